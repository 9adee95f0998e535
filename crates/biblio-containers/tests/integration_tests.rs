//! Integration tests for the container enumerators.
//!
//! Each test writes a small corpus into a temporary directory in one of the
//! supported layouts and reads it back through the public API.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use biblio_containers::payload::XML_DECLARATION;
use biblio_containers::{
    sample, ContainerCache, ContainerError, ContainerSource, DirectoryContainers, PayloadFormat,
    SingleContainer, TarContainers, ZipContainers,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;
use tempfile::TempDir;

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn write_gz(path: &Path, bytes: &[u8]) {
    let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::fast());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap();
}

fn works_payload(dois: &[&str]) -> Vec<u8> {
    let items: Vec<_> = dois.iter().map(|d| json!({ "DOI": d })).collect();
    serde_json::to_vec(&json!({ "items": items })).unwrap()
}

fn write_tar_gz(path: &Path, members: &[(&str, &[u8])]) {
    let enc = GzEncoder::new(File::create(path).unwrap(), Compression::fast());
    let mut builder = tar::Builder::new(enc);
    for (name, body) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
}

// ── Test 1: directory listing is sorted, filtered and decoded ──

#[test]
fn directory_sorted_and_decoded() {
    let dir = TempDir::new().unwrap();
    write_gz(&dir.path().join("1.json.gz"), &works_payload(&["10.1/b", "10.1/c"]));
    write_gz(&dir.path().join("0.json.gz"), &works_payload(&["10.1/a"]));
    std::fs::write(dir.path().join("README.txt"), b"not a container").unwrap();

    let mut src =
        DirectoryContainers::open(dir.path(), ".json.gz", PayloadFormat::json_items("items"), None)
            .unwrap();
    assert_eq!(src.len(), 2);
    assert_eq!(src.name(0), Some("0.json.gz"));
    assert_eq!(src.load(1).unwrap().len(), 2);
    assert_eq!(src.load(0).unwrap()[0]["DOI"], json!("10.1/a"));
}

// ── Test 2: sampling is repeatable and excludes rejected containers ──

#[test]
fn directory_sampling_is_repeatable() {
    let dir = TempDir::new().unwrap();
    for i in 0..40 {
        write_gz(&dir.path().join(format!("{i:03}.json.gz")), &works_payload(&["10.1/x"]));
    }
    let names = |seed| {
        let src = DirectoryContainers::open(
            dir.path(),
            ".json.gz",
            PayloadFormat::json_items("items"),
            Some(sample::random_fraction(0.3, seed)),
        )
        .unwrap();
        (0..src.len() as u32).map(|i| src.name(i).unwrap().to_string()).collect::<Vec<_>>()
    };
    let first = names(11);
    assert_eq!(first, names(11));
    assert!(first.len() < 40);
}

// ── Test 3: tar members stream forward and rewind on demand ──

#[test]
fn tar_members_forward_and_backward() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("summaries.tar.gz");
    let long_name = format!("{}/0000-0002-1825-0097.xml", "nested/".repeat(20));
    write_tar_gz(
        &path,
        &[
            ("a/0000-0001.xml", &b"<record><name>A</name></record>"[..]),
            ("a/skip.txt", &b"ignored by the sampler"[..]),
            (long_name.as_str(), &b"<record><name>B</name></record>"[..]),
        ],
    );

    let mut src = TarContainers::open(
        &path,
        PayloadFormat::Xml,
        Some(std::sync::Arc::new(|name: &str| name.ends_with(".xml"))),
    )
    .unwrap();
    assert_eq!(src.len(), 2);
    assert_eq!(src.name(1), Some(long_name.as_str()));

    let b = src.load(1).unwrap();
    assert_eq!(b[0]["name"][0], json!("B"));
    // Backwards request reopens the archive.
    let a = src.load(0).unwrap();
    assert_eq!(a[0]["name"][0], json!("A"));
    src.release();
    assert_eq!(src.load(1).unwrap().len(), 1);
}

// ── Test 4: zip members holding concatenated XML fragments ──

#[test]
fn zip_fragments() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ipg240102.zip");
    {
        let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
        let payload = format!(
            "{XML_DECLARATION}\n<grant id=\"1\"/>\n{XML_DECLARATION}\n<grant id=\"2\"/>\n"
        );
        zip.start_file("ipg240102.xml", zip::write::FileOptions::default()).unwrap();
        zip.write_all(payload.as_bytes()).unwrap();
        zip.start_file("notes.txt", zip::write::FileOptions::default()).unwrap();
        zip.write_all(b"x").unwrap();
        zip.finish().unwrap();
    }

    let mut src = ZipContainers::open(&path, ".xml", PayloadFormat::xml_fragments(), None).unwrap();
    assert_eq!(src.len(), 1);
    let grants = src.load(0).unwrap();
    assert_eq!(grants.len(), 2);
    assert_eq!(grants[1]["@id"], json!("2"));

    // The same bundle read as a directory container.
    let mut from_dir =
        DirectoryContainers::open(dir.path(), ".zip", PayloadFormat::xml_fragments(), None)
            .unwrap()
            .with_member_suffix(".xml");
    assert_eq!(from_dir.load(0).unwrap().len(), 2);
}

// ── Test 5: single CSV partition through the cache ──

#[test]
fn single_csv_through_cache() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("journals.csv");
    std::fs::write(&path, "issn,title\n1111-2222,Alpha\n3333-4444,Beta\n").unwrap();

    let source = SingleContainer::open(&path, PayloadFormat::Csv { delimiter: b',' });
    let mut cache = ContainerCache::new(source);
    assert_eq!(cache.len(), 1);
    let rows = cache.get(0).unwrap();
    assert_eq!(rows.len(), 2);
    cache.get(0).unwrap();
    assert_eq!(cache.misses(), 1);
    assert!(matches!(cache.get(1), Err(ContainerError::OutOfRange { id: 1, count: 1 })));
}

// ── Test 6: corrupt containers name themselves ──

#[test]
fn corrupt_container_reports_name() {
    let dir = TempDir::new().unwrap();
    write_gz(&dir.path().join("bad.json.gz"), b"{ not json");
    let mut src =
        DirectoryContainers::open(dir.path(), ".json.gz", PayloadFormat::json_items("items"), None)
            .unwrap();
    let err = src.load(0).unwrap_err();
    assert!(matches!(err, ContainerError::Json { ref name, .. } if name == "bad.json.gz"));
}

// ── Test 7: PAX names and consecutive forward loads ──

/// One `"<len> key=value\n"` PAX record; `len` counts the whole record.
fn pax_record(key: &str, value: &str) -> Vec<u8> {
    let body = format!(" {key}={value}\n");
    let mut len = body.len() + 1;
    while format!("{len}{body}").len() != len {
        len += 1;
    }
    format!("{len}{body}").into_bytes()
}

#[test]
fn tar_pax_names_and_sequential_loads() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("grants.tar");
    let pax_name = format!("{}/ipg-long.json", "deep".repeat(40));

    let mut builder = tar::Builder::new(File::create(&path).unwrap());
    let mut append = |name: &str, body: &[u8]| {
        let mut header = tar::Header::new_ustar();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
    };
    // Bodies shorter than a block, so every member ends in padding.
    append("0.json", &works_payload(&["10.1/a"]));
    append("1.json", &works_payload(&["10.1/b", "10.1/bb"]));
    drop(append);

    let record = pax_record("path", &pax_name);
    let mut pax = tar::Header::new_ustar();
    pax.set_entry_type(tar::EntryType::XHeader);
    pax.set_path("PaxHeaders/2").unwrap();
    pax.set_size(record.len() as u64);
    pax.set_mode(0o644);
    pax.set_cksum();
    builder.append(&pax, &record[..]).unwrap();

    let body = works_payload(&["10.1/c"]);
    let mut header = tar::Header::new_ustar();
    header.set_path("short.json").unwrap();
    header.set_size(body.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder.append(&header, &body[..]).unwrap();
    builder.finish().unwrap();
    drop(builder);

    let mut src = TarContainers::open(&path, PayloadFormat::json_items("items"), None).unwrap();
    assert_eq!(src.len(), 3);
    assert_eq!(src.name(2), Some(pax_name.as_str()));

    // One forward pass over the held reader.
    assert_eq!(src.load(0).unwrap()[0]["DOI"], json!("10.1/a"));
    assert_eq!(src.load(1).unwrap().len(), 2);
    assert_eq!(src.load(2).unwrap()[0]["DOI"], json!("10.1/c"));
    assert!(matches!(src.load(3), Err(ContainerError::OutOfRange { .. })));
}
