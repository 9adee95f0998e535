//! End-to-end tests over gzip JSON corpora written to temporary directories.
//!
//! The fixture corpus has three containers:
//!
//! | container | works | authors (orcid)                 | subjects      |
//! |-----------|-------|---------------------------------|---------------|
//! | 0         | A     | Ann (0001, MIT), Bob (-, Lab)   | Physics, Math |
//! | 0         | B     | Dan (0002)                      |               |
//! | 1         | C     | Eve (0003)                      | Bio           |
//! | 2         | D     |                                 |               |

use std::cell::RefCell;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::rc::Rc;

use biblio_containers::{sample, DirectoryContainers, PayloadFormat, SamplePredicate};
use biblio_vdb::{
    extract, AttachSpec, ColumnMeta, DataSource, ErrorKind, Schema, SourceOptions, TableMeta, VdbError,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use rusqlite::types::Value as SqlValue;
use rusqlite::Connection;
use serde_json::{json, Value};
use tempfile::TempDir;

// ─────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────

fn write_gz(path: &Path, payload: &Value) {
    let mut enc = GzEncoder::new(File::create(path).unwrap(), Compression::fast());
    enc.write_all(&serde_json::to_vec(payload).unwrap()).unwrap();
    enc.finish().unwrap();
}

fn write_corpus(dir: &Path) {
    write_gz(
        &dir.join("0.json.gz"),
        &json!({"items": [
            {"DOI": "10.1/A", "title": "Alpha", "subject": ["Physics", "Math"], "author": [
                {"given": "Ann", "ORCID": "0001", "affiliation": [{"name": "MIT"}]},
                {"given": "Bob", "affiliation": [{"name": "Lab"}]}
            ]},
            {"DOI": "10.1/B", "title": "Beta", "author": [{"given": "Dan", "ORCID": "0002"}]}
        ]}),
    );
    write_gz(
        &dir.join("1.json.gz"),
        &json!({"items": [
            {"DOI": "10.1/C", "subject": ["Bio"], "author": [{"given": "Eve", "ORCID": "0003"}]}
        ]}),
    );
    write_gz(&dir.join("2.json.gz"), &json!({"items": [{"DOI": "10.1/D"}]}));
}

fn schema() -> Schema {
    Schema::new(vec![
        TableMeta::new("works").columns(vec![
            ColumnMeta::rowid("id"),
            ColumnMeta::container_id(),
            ColumnMeta::new("doi", extract::lowercase("DOI")),
            ColumnMeta::new("title", extract::text("title")),
        ]),
        TableMeta::new("work_authors")
            .parent("works", "work_id", "id")
            .elements("author", 8)
            .columns(vec![
                ColumnMeta::rowid("id"),
                ColumnMeta::container_id(),
                ColumnMeta::parent_rowid("work_id"),
                ColumnMeta::new("given", extract::path("given")),
                ColumnMeta::new("orcid", extract::path("ORCID")),
            ])
            .post_population_script(
                "-- lookups by ORCID\n\
                 CREATE INDEX work_authors_orcid_idx ON work_authors(orcid);\n\
                 CREATE INDEX work_authors_email_idx ON work_authors(email);\n",
            ),
        TableMeta::new("author_affiliations")
            .parent("work_authors", "author_id", "id")
            .elements("affiliation", 6)
            .columns(vec![
                ColumnMeta::rowid("id"),
                ColumnMeta::container_id(),
                ColumnMeta::parent_rowid("author_id"),
                ColumnMeta::new("name", extract::path("name")),
            ]),
        TableMeta::new("work_subjects")
            .parent("works", "work_id", "id")
            .elements("subject", 8)
            .columns(vec![
                ColumnMeta::rowid("id"),
                ColumnMeta::container_id(),
                ColumnMeta::parent_rowid("work_id"),
                ColumnMeta::new("name", extract::to_sql),
            ]),
    ])
    .unwrap()
}

fn open_source(dir: &Path, sample: Option<SamplePredicate>, options: SourceOptions) -> DataSource {
    let containers =
        DirectoryContainers::open(dir, ".json.gz", PayloadFormat::json_items("items"), sample).unwrap();
    DataSource::new(schema(), containers, options).unwrap()
}

fn fixture() -> (TempDir, DataSource) {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let db = open_source(dir.path(), None, SourceOptions::default());
    (dir, db)
}

fn dump(conn: &Connection, sql: &str) -> Vec<Vec<SqlValue>> {
    let mut stmt = conn.prepare(sql).unwrap();
    let width = stmt.column_count();
    let rows = stmt
        .query_map([], |row| (0..width).map(|i| row.get::<_, SqlValue>(i)).collect())
        .unwrap();
    rows.collect::<rusqlite::Result<Vec<Vec<SqlValue>>>>().unwrap()
}

fn strings(conn: &Connection, sql: &str) -> Vec<String> {
    dump(conn, sql)
        .into_iter()
        .map(|row| match &row[0] {
            SqlValue::Text(s) => s.clone(),
            other => format!("{other:?}"),
        })
        .collect()
}

fn count(conn: &Connection, table: &str) -> i64 {
    conn.query_row(&format!("SELECT count(*) FROM {table}"), [], |r| r.get(0)).unwrap()
}

// ── Test 1: full population, repeated, gives identical tables ──

#[test]
fn populate_everything_is_idempotent() {
    let (dir, mut db) = fixture();
    let dest = dir.path().join("out.db");

    let first = db.populate(&dest, None, None).unwrap();
    let snapshot = |conn: &Connection| {
        ["works", "work_authors", "author_affiliations", "work_subjects"]
            .iter()
            .map(|t| dump(conn, &format!("SELECT * FROM {t} ORDER BY id")))
            .collect::<Vec<_>>()
    };
    let before = snapshot(&Connection::open(&dest).unwrap());

    let second = db.populate(&dest, None, None).unwrap();
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(snapshot(&conn), before);
    assert_eq!(first, second);

    assert_eq!(count(&conn, "works"), 4);
    assert_eq!(count(&conn, "work_authors"), 4);
    assert_eq!(count(&conn, "author_affiliations"), 2);
    assert_eq!(count(&conn, "work_subjects"), 3);
    assert_eq!(first.rows["work_authors"], 4);
    assert_eq!(first.containers, 3);

    // Key columns carry the composite identities, so the tables join.
    let joined: i64 = conn
        .query_row("SELECT count(*) FROM work_authors a JOIN works w ON a.work_id = w.id", [], |r| r.get(0))
        .unwrap();
    assert_eq!(joined, 4);
}

// ── Test 2: root-only column selection ──

#[test]
fn populate_selected_root_column() {
    let (dir, mut db) = fixture();
    let dest = dir.path().join("dois.db");

    db.populate(&dest, Some(&["works.doi"]), None).unwrap();
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(
        strings(&conn, "SELECT name FROM pragma_table_info('works')"),
        vec!["doi"]
    );
    assert_eq!(
        strings(&conn, "SELECT doi FROM works ORDER BY doi"),
        vec!["10.1/a", "10.1/b", "10.1/c", "10.1/d"]
    );
    assert!(conn.prepare("SELECT * FROM work_authors").is_err());

    let err = db.populate(&dest, Some(&["journals.issn"]), None).unwrap_err();
    assert!(matches!(err, VdbError::UnknownTable(ref t) if t == "journals"));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    let err = db.populate(&dest, Some(&["works"]), None).unwrap_err();
    assert!(matches!(err, VdbError::ColumnSpec(_)));
}

// ── Test 3: a condition on a detail table restricts its subtree only ──

#[test]
fn populate_with_detail_condition() {
    let (dir, mut db) = fixture();
    let dest = dir.path().join("ann.db");
    let misses = db.cache_misses();

    db.populate(&dest, None, Some("work_authors.orcid = '0001'")).unwrap();
    let conn = Connection::open(&dest).unwrap();

    assert_eq!(strings(&conn, "SELECT doi FROM works"), vec!["10.1/a"]);
    // Only the author taking part in the match, and only their affiliation.
    assert_eq!(strings(&conn, "SELECT given FROM work_authors"), vec!["Ann"]);
    assert_eq!(strings(&conn, "SELECT name FROM author_affiliations"), vec!["MIT"]);
    // Siblings of the matched author keep every row of the matched work.
    assert_eq!(
        strings(&conn, "SELECT name FROM work_subjects ORDER BY name"),
        vec!["Math", "Physics"]
    );
    // Each container was decoded once.
    assert_eq!(db.cache_misses() - misses, 3);
}

// ── Test 4: root conditions take the direct path ──

#[test]
fn populate_with_root_condition() {
    let (dir, mut db) = fixture();
    let dest = dir.path().join("root.db");

    let report = db.populate(&dest, Some(&["works.*"]), Some("works.doi = '10.1/b'")).unwrap();
    assert_eq!(report.rows["works"], 1);
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(strings(&conn, "SELECT title FROM works"), vec!["Beta"]);

    db.populate(&dest, Some(&["works.*"]), Some("1 = 0")).unwrap();
    assert_eq!(count(&Connection::open(&dest).unwrap(), "works"), 0);

    // A condition on the root keeps whole subtrees of matching works.
    db.populate(&dest, None, Some("works.title = 'Alpha'")).unwrap();
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(count(&conn, "work_authors"), 2);
    assert_eq!(count(&conn, "author_affiliations"), 2);
}

// ── Test 5: partitioned and direct queries agree ──

#[test]
fn partitioned_query_matches_direct() {
    let (_dir, mut db) = fixture();
    for sql in [
        "SELECT doi, title FROM works ORDER BY doi",
        "SELECT w.doi, a.given, a.orcid FROM works w JOIN work_authors a ON a.work_id = w.id
         ORDER BY w.doi, a.given",
        "SELECT a.given, s.name FROM work_authors a JOIN work_subjects s ON s.work_id = a.work_id
         ORDER BY a.given, s.name",
    ] {
        let direct = db.query(sql, false).unwrap();
        let partitioned = db.query(sql, true).unwrap();
        assert!(!direct.rows.is_empty(), "{sql}");
        assert_eq!(direct, partitioned, "{sql}");
    }
}

// ── Test 6: sampled containers contribute nothing ──

#[test]
fn sampling_excludes_containers() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let dest = dir.path().join("sampled.db");

    let mut db = open_source(dir.path(), Some(sample::name_contains("1.")), SourceOptions::default());
    assert_eq!(db.container_count(), 1);
    db.populate(&dest, Some(&["works.doi"]), None).unwrap();
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(strings(&conn, "SELECT doi FROM works"), vec!["10.1/c"]);

    let mut none = open_source(dir.path(), Some(sample::random_fraction(0.0, 9)), SourceOptions::default());
    let report = none.populate(&dest, Some(&["works.doi"]), None).unwrap();
    assert_eq!(report.containers, 0);
    assert_eq!(count(&Connection::open(&dest).unwrap(), "works"), 0);
}

// ── Test 7: attached databases in queries and conditions ──

#[test]
fn attached_database_in_condition() {
    let dir = TempDir::new().unwrap();
    write_corpus(dir.path());
    let input = dir.path().join("input.db");
    Connection::open(&input)
        .unwrap()
        .execute_batch("CREATE TABLE dois(doi TEXT); INSERT INTO dois VALUES ('10.1/c'), ('10.1/a');")
        .unwrap();

    let spec = AttachSpec::parse(&format!("input:{}", input.display())).unwrap();
    let mut db = open_source(dir.path(), None, SourceOptions::default().attach(spec));

    let dest = dir.path().join("selected.db");
    db.populate(&dest, Some(&["works.doi", "work_authors.given"]), Some("works.doi IN (SELECT doi FROM input.dois)"))
        .unwrap();
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(strings(&conn, "SELECT doi FROM works ORDER BY doi"), vec!["10.1/a", "10.1/c"]);
    assert_eq!(strings(&conn, "SELECT given FROM work_authors ORDER BY given"), vec!["Ann", "Bob", "Eve"]);

    let sql = "SELECT w.doi FROM works w JOIN input.dois d ON d.doi = w.doi ORDER BY w.doi";
    assert_eq!(db.query(sql, true).unwrap(), db.query(sql, false).unwrap());

    // Subqueries planned on real B-tree tables.
    let sql = "SELECT doi FROM works WHERE doi IN (SELECT doi FROM input.dois WHERE rowid > 0) ORDER BY doi";
    let partitioned = db.query(sql, true).unwrap();
    assert_eq!(partitioned.rows.len(), 2);
    assert_eq!(partitioned, db.query(sql, false).unwrap());

    let dest = dir.path().join("ranged.db");
    db.populate(&dest, Some(&["works.doi"]), Some("works.doi IN (SELECT doi FROM input.dois WHERE rowid > 1)"))
        .unwrap();
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(strings(&conn, "SELECT doi FROM works"), vec!["10.1/a"]);
}

// ── Test 8: failing script statements are skipped ──

#[test]
fn post_population_script_failures_are_skipped() {
    let (dir, mut db) = fixture();
    let dest = dir.path().join("scripted.db");

    // `email` is not a column: the second index fails, the first stays.
    let report = db.populate(&dest, Some(&["work_authors.*"]), None).unwrap();
    assert_eq!(report.script_statements, 1);
    let conn = Connection::open(&dest).unwrap();
    assert_eq!(
        strings(&conn, "SELECT name FROM sqlite_master WHERE type = 'index' ORDER BY name"),
        vec!["work_authors_orcid_idx"]
    );
}

// ── Test 9: progress hook sees every container ──

#[test]
fn progress_reported_per_container() {
    let (dir, mut db) = fixture();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    db.set_progress(move |p| sink.borrow_mut().push((p.completed, p.name.clone())));

    db.populate(dir.path().join("p.db"), Some(&["works.doi"]), Some("works.doi <> ''")).unwrap();
    assert_eq!(
        *seen.borrow(),
        vec![(1, "0.json.gz".to_string()), (2, "1.json.gz".to_string()), (3, "2.json.gz".to_string())]
    );
}
