//! XML documents mapped onto the same `serde_json::Value` tree used for JSON
//! payloads, so one cursor protocol serves both.
//!
//! Mapping for an element:
//! - attributes become `"@name": "value"` entries,
//! - child elements are grouped by tag into arrays in document order,
//! - character data (text and CDATA) is concatenated under `"#text"`,
//! - an element with only text collapses to a plain string, and an element
//!   with nothing at all to an empty string.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};

use crate::error::ContainerError;

/// Key under which an element's character data is stored.
pub const TEXT_KEY: &str = "#text";

/// Parses one XML document and returns its root element.
pub fn parse_document(name: &str, bytes: &[u8]) -> Result<Value, ContainerError> {
    let mut reader = Reader::from_reader(bytes);
    reader.trim_text(true);

    // (tag, element under construction)
    let mut stack: Vec<(String, Map<String, Value>)> = Vec::new();
    let mut root: Option<Value> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                let element = start_element(name, &e)?;
                stack.push((tag_name(&e), element));
            }
            Ok(Event::Empty(e)) => {
                let element = finish_element(start_element(name, &e)?);
                attach(&mut stack, &mut root, tag_name(&e), element);
            }
            Ok(Event::End(_)) => {
                let (tag, element) = stack
                    .pop()
                    .ok_or_else(|| ContainerError::xml(name, "unbalanced end tag"))?;
                attach(&mut stack, &mut root, tag, finish_element(element));
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().map_err(|e| ContainerError::xml(name, e))?;
                push_text(&mut stack, &text);
            }
            Ok(Event::CData(c)) => {
                let raw = c.into_inner();
                push_text(&mut stack, &String::from_utf8_lossy(&raw));
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(ContainerError::xml(
                    name,
                    format!("at byte {}: {e}", reader.buffer_position()),
                ))
            }
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(ContainerError::xml(name, "document ended inside an element"));
    }
    root.ok_or_else(|| ContainerError::xml(name, "no root element"))
}

/// Splits a payload of concatenated XML documents on `delimiter` (normally a
/// repeated XML declaration) and parses each non-blank fragment.
pub fn parse_fragments(
    name: &str,
    bytes: &[u8],
    delimiter: &str,
) -> Result<Vec<Value>, ContainerError> {
    let text = std::str::from_utf8(bytes).map_err(|e| ContainerError::xml(name, e))?;
    text.split(delimiter)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| parse_document(name, chunk.as_bytes()))
        .collect()
}

// ─────────────────────────────────────────────
// Internal helpers
// ─────────────────────────────────────────────

fn tag_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

fn start_element(name: &str, e: &BytesStart<'_>) -> Result<Map<String, Value>, ContainerError> {
    let mut element = Map::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|err| ContainerError::xml(name, err))?;
        let key = format!("@{}", String::from_utf8_lossy(attr.key.as_ref()));
        let value = attr
            .unescape_value()
            .map_err(|err| ContainerError::xml(name, err))?;
        element.insert(key, Value::String(value.into_owned()));
    }
    Ok(element)
}

fn push_text(stack: &mut [(String, Map<String, Value>)], text: &str) {
    let Some((_, element)) = stack.last_mut() else {
        return;
    };
    match element.get_mut(TEXT_KEY) {
        Some(Value::String(existing)) => existing.push_str(text),
        _ => {
            element.insert(TEXT_KEY.to_string(), Value::String(text.to_string()));
        }
    }
}

fn finish_element(element: Map<String, Value>) -> Value {
    if element.is_empty() {
        return Value::String(String::new());
    }
    if element.len() == 1 {
        if let Some(Value::String(text)) = element.get(TEXT_KEY) {
            return Value::String(text.clone());
        }
    }
    Value::Object(element)
}

fn attach(
    stack: &mut [(String, Map<String, Value>)],
    root: &mut Option<Value>,
    tag: String,
    value: Value,
) {
    match stack.last_mut() {
        Some((_, parent)) => match parent.entry(tag).or_insert_with(|| Value::Array(Vec::new())) {
            Value::Array(children) => children.push(value),
            other => *other = Value::Array(vec![other.take(), value]),
        },
        None => *root = Some(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attributes_children_and_text() {
        let doc = br#"<?xml version="1.0"?>
            <record id="r1">
              <title lang="en">Thus Spoke</title>
              <author><name>A</name></author>
              <author><name>B</name><orcid>0000-1</orcid></author>
              <empty/>
            </record>"#;
        let v = parse_document("doc.xml", doc).unwrap();
        assert_eq!(v["@id"], json!("r1"));
        assert_eq!(v["title"][0]["@lang"], json!("en"));
        assert_eq!(v["title"][0]["#text"], json!("Thus Spoke"));
        assert_eq!(v["author"].as_array().unwrap().len(), 2);
        assert_eq!(v["author"][1]["orcid"][0], json!("0000-1"));
        assert_eq!(v["empty"][0], json!(""));
    }

    #[test]
    fn fragments_split_on_declaration() {
        let decl = r#"<?xml version="1.0" encoding="UTF-8"?>"#;
        let payload = format!("{decl}\n<a n=\"1\"/>\n{decl}\n<a n=\"2\"/>\n");
        let records = parse_fragments("grants.xml", payload.as_bytes(), decl).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1]["@n"], json!("2"));
    }

    #[test]
    fn malformed_is_reported_with_name() {
        let err = parse_document("bad.xml", b"<a><b></a>").unwrap_err();
        assert!(err.to_string().contains("bad.xml"));
    }
}
