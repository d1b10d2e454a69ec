//! Path codec: (table, id) ↔ tree paths
//!
//! Documents live inside commit trees at `<table>/<encoded-id>.json`; schema
//! records at `_schema/<table>.json`. Ids are percent-encoded so that any id
//! maps to exactly one valid tree entry name and back.

use chrondb_core::{ChronError, ChronResult, DocId, TableName};

/// File extension of document entries.
pub const DOC_EXT: &str = ".json";

// Characters that may not appear raw in a tree entry name. '%' first so the
// escape character itself round-trips.
const RESERVED: &[char] = &['%', '/', '\\', ':', '*', '?', '"', '<', '>', '|', '\0', '\n'];

/// Percent-encode a document id for use as a tree entry name.
pub fn encode_id(id: &DocId) -> String {
    let mut out = String::with_capacity(id.as_str().len());
    for c in id.as_str().chars() {
        if RESERVED.contains(&c) || c.is_control() || c == ' ' {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).as_bytes() {
                out.push('%');
                out.push_str(&format!("{:02X}", byte));
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Decode a percent-encoded id.
pub fn decode_id(encoded: &str) -> ChronResult<DocId> {
    let mut bytes = Vec::with_capacity(encoded.len());
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c == '%' {
            let hi = chars
                .next()
                .ok_or_else(|| ChronError::invalid_input("truncated percent escape"))?;
            let lo = chars
                .next()
                .ok_or_else(|| ChronError::invalid_input("truncated percent escape"))?;
            let byte = u8::from_str_radix(&format!("{}{}", hi, lo), 16)
                .map_err(|_| ChronError::invalid_input(format!("bad percent escape %{}{}", hi, lo)))?;
            bytes.push(byte);
        } else {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        }
    }
    let s = String::from_utf8(bytes)
        .map_err(|_| ChronError::invalid_input("decoded id is not UTF-8"))?;
    DocId::new(s)
}

/// Tree entry name of a document: `<encoded-id>.json`.
pub fn doc_file_name(id: &DocId) -> String {
    format!("{}{}", encode_id(id), DOC_EXT)
}

/// Path components of a document inside a commit tree.
pub fn doc_path(table: &TableName, id: &DocId) -> [String; 2] {
    [table.to_string(), doc_file_name(id)]
}

/// Parse a tree entry name back into a document id.
///
/// Returns `None` for entries that are not document files.
pub fn parse_doc_file_name(name: &str) -> Option<DocId> {
    let encoded = name.strip_suffix(DOC_EXT)?;
    decode_id(encoded).ok()
}

/// Path components of a table's schema record.
pub fn schema_path(table: &TableName) -> [String; 2] {
    [
        chrondb_core::SCHEMA_TABLE.to_string(),
        format!("{}{}", table, DOC_EXT),
    ]
}

/// Parse a schema record file name back into its table name.
pub fn parse_schema_file_name(name: &str) -> Option<TableName> {
    let table = name.strip_suffix(DOC_EXT)?;
    TableName::new(table).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc_id(s: &str) -> DocId {
        DocId::new(s).unwrap()
    }

    #[test]
    fn test_plain_id_unchanged() {
        assert_eq!(encode_id(&doc_id("abc-123_x.y")), "abc-123_x.y");
    }

    #[test]
    fn test_reserved_characters_escaped() {
        assert_eq!(encode_id(&doc_id("user:1")), "user%3A1");
        assert_eq!(encode_id(&doc_id("a/b")), "a%2Fb");
        assert_eq!(encode_id(&doc_id("50% off")), "50%25%20off");
    }

    #[test]
    fn test_encode_decode_round_trip() {
        for raw in ["user:1", "a/b\\c", "q?x*y", "plain", "météo:près", "% %%"] {
            let id = doc_id(raw);
            let encoded = encode_id(&id);
            assert_eq!(decode_id(&encoded).unwrap(), id, "round trip for {:?}", raw);
        }
    }

    #[test]
    fn test_decode_rejects_bad_escapes() {
        assert!(decode_id("abc%").is_err());
        assert!(decode_id("abc%G1").is_err());
    }

    #[test]
    fn test_doc_path_components() {
        let table = TableName::new("user").unwrap();
        let [dir, file] = doc_path(&table, &doc_id("user:1"));
        assert_eq!(dir, "user");
        assert_eq!(file, "user%3A1.json");
    }

    #[test]
    fn test_parse_doc_file_name() {
        assert_eq!(
            parse_doc_file_name("user%3A1.json"),
            Some(doc_id("user:1"))
        );
        assert_eq!(parse_doc_file_name("notes.txt"), None);
        assert_eq!(parse_doc_file_name(".json"), None); // empty id
    }

    #[test]
    fn test_schema_path_shape() {
        let table = TableName::new("users").unwrap();
        let [dir, file] = schema_path(&table);
        assert_eq!(dir, "_schema");
        assert_eq!(file, "users.json");
        assert_eq!(
            parse_schema_file_name("users.json"),
            Some(TableName::new("users").unwrap())
        );
    }

    #[cfg(test)]
    mod props {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn encode_decode_round_trips(raw in "[ -~]{1,40}") {
                let id = DocId::new(raw.clone()).unwrap();
                let encoded = encode_id(&id);
                prop_assert_eq!(decode_id(&encoded).unwrap(), id);
                // Encoded names never contain tree-reserved bytes
                prop_assert!(!encoded.contains('/'));
                prop_assert!(!encoded.contains('\0'));
                prop_assert!(!encoded.contains('\n'));
            }
        }
    }
}
