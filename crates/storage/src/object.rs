//! Object model and canonical serialization
//!
//! Objects are the write-once values of the commit graph:
//! - Blob: raw document bytes
//! - Tree: ordered list of (name, mode, object id), sorted by name
//! - Commit: tree root, up to two parents, author/committer, timestamp, message
//!
//! An object's id is the hash of its canonical serialization, so the
//! serialization must be deterministic byte-for-byte: tree entries are sorted
//! by name, commit metadata has a fixed textual layout, and parsing is strict
//! (any deviation fails with `StoreCorrupt`). Trees and commits are value
//! objects keyed by hash; they never hold owning pointers to other objects.

use chrondb_core::{ChronError, ChronResult, ObjectId};

/// Mode of a tree entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryMode {
    /// Regular file (a blob)
    File,
    /// Directory (a subtree)
    Dir,
}

impl EntryMode {
    fn as_str(&self) -> &'static str {
        match self {
            EntryMode::File => "100644",
            EntryMode::Dir => "40000",
        }
    }

    fn parse(s: &str) -> ChronResult<Self> {
        match s {
            "100644" => Ok(EntryMode::File),
            "40000" => Ok(EntryMode::Dir),
            other => Err(ChronError::corrupt(format!("unknown tree entry mode: {}", other))),
        }
    }
}

/// One edge of a tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Entry name (file or directory name, no separators)
    pub name: String,
    /// File or directory
    pub mode: EntryMode,
    /// Object the entry points at
    pub id: ObjectId,
}

/// An ordered directory-like object
///
/// Entries are kept sorted by name so serialization is canonical and lookups
/// can binary-search. Edits return new trees; existing trees are never
/// mutated.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tree {
    entries: Vec<TreeEntry>,
}

impl Tree {
    /// The empty tree.
    pub fn empty() -> Self {
        Tree { entries: Vec::new() }
    }

    /// Build from entries; sorts and rejects duplicate or invalid names.
    pub fn from_entries(mut entries: Vec<TreeEntry>) -> ChronResult<Self> {
        for e in &entries {
            validate_entry_name(&e.name)?;
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        for pair in entries.windows(2) {
            if pair[0].name == pair[1].name {
                return Err(ChronError::corrupt(format!(
                    "duplicate tree entry: {}",
                    pair[0].name
                )));
            }
        }
        Ok(Tree { entries })
    }

    /// Entries in name order.
    pub fn entries(&self) -> &[TreeEntry] {
        &self.entries
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the tree has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up an entry by name.
    pub fn get(&self, name: &str) -> Option<&TreeEntry> {
        self.entries
            .binary_search_by(|e| e.name.as_str().cmp(name))
            .ok()
            .map(|i| &self.entries[i])
    }

    /// New tree with `entry` inserted or replaced.
    pub fn with_entry(&self, entry: TreeEntry) -> ChronResult<Tree> {
        validate_entry_name(&entry.name)?;
        let mut entries = self.entries.clone();
        match entries.binary_search_by(|e| e.name.cmp(&entry.name)) {
            Ok(i) => entries[i] = entry,
            Err(i) => entries.insert(i, entry),
        }
        Ok(Tree { entries })
    }

    /// New tree with the named entry removed (no-op when absent).
    pub fn without_entry(&self, name: &str) -> Tree {
        let mut entries = self.entries.clone();
        if let Ok(i) = entries.binary_search_by(|e| e.name.as_str().cmp(name)) {
            entries.remove(i);
        }
        Tree { entries }
    }
}

fn validate_entry_name(name: &str) -> ChronResult<()> {
    if name.is_empty() {
        return Err(ChronError::invalid_input("tree entry name must not be empty"));
    }
    if name.contains('/') || name.contains('\0') || name.contains('\n') {
        return Err(ChronError::invalid_input(format!(
            "tree entry name contains reserved characters: {:?}",
            name
        )));
    }
    if name == "." || name == ".." {
        return Err(ChronError::invalid_input("tree entry name may not be '.' or '..'"));
    }
    Ok(())
}

/// An immutable snapshot record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    /// Root tree
    pub tree: ObjectId,
    /// Zero, one, or two parents (two only for merge commits)
    pub parents: Vec<ObjectId>,
    /// Author (the transaction's user)
    pub author: String,
    /// Committer signature from config
    pub committer: String,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: i64,
    /// Message encoding op kind and document ids
    pub message: String,
}

impl Commit {
    /// First parent, if any. History walks follow first parents.
    pub fn first_parent(&self) -> Option<ObjectId> {
        self.parents.first().copied()
    }
}

/// One of the three object kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// Raw bytes
    Blob(Vec<u8>),
    /// Directory
    Tree(Tree),
    /// Snapshot record
    Commit(Commit),
}

impl Object {
    /// Kind tag used in the serialized header.
    pub fn kind(&self) -> &'static str {
        match self {
            Object::Blob(_) => "blob",
            Object::Tree(_) => "tree",
            Object::Commit(_) => "commit",
        }
    }

    /// Id of this object (hash of its canonical bytes).
    pub fn id(&self) -> ObjectId {
        ObjectId::hash(&self.canonical_bytes())
    }

    /// Canonical serialization.
    ///
    /// Layout is `<kind> <body-len>\n<body>`. Blob bodies are the raw bytes.
    /// Tree bodies are one line per entry: `<mode> <name>\0<id-hex>\n`.
    /// Commit bodies are a fixed header block, a blank line, and the message.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let body = match self {
            Object::Blob(bytes) => bytes.clone(),
            Object::Tree(tree) => {
                let mut out = Vec::new();
                for e in tree.entries() {
                    out.extend_from_slice(e.mode.as_str().as_bytes());
                    out.push(b' ');
                    out.extend_from_slice(e.name.as_bytes());
                    out.push(0);
                    out.extend_from_slice(e.id.to_hex().as_bytes());
                    out.push(b'\n');
                }
                out
            }
            Object::Commit(c) => {
                let mut out = String::new();
                out.push_str(&format!("tree {}\n", c.tree));
                for p in &c.parents {
                    out.push_str(&format!("parent {}\n", p));
                }
                out.push_str(&format!("author {}\n", c.author));
                out.push_str(&format!("committer {}\n", c.committer));
                out.push_str(&format!("timestamp {}\n", c.timestamp_ms));
                out.push('\n');
                out.push_str(&c.message);
                out.into_bytes()
            }
        };
        let mut framed = format!("{} {}\n", self.kind(), body.len()).into_bytes();
        framed.extend_from_slice(&body);
        framed
    }

    /// Strict parse of canonical bytes.
    pub fn parse(bytes: &[u8]) -> ChronResult<Object> {
        let newline = bytes
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| ChronError::corrupt("object header missing newline"))?;
        let header = std::str::from_utf8(&bytes[..newline])
            .map_err(|_| ChronError::corrupt("object header is not UTF-8"))?;
        let (kind, len_str) = header
            .split_once(' ')
            .ok_or_else(|| ChronError::corrupt(format!("malformed object header: {}", header)))?;
        let body_len: usize = len_str
            .parse()
            .map_err(|_| ChronError::corrupt(format!("bad object body length: {}", len_str)))?;
        let body = &bytes[newline + 1..];
        if body.len() != body_len {
            return Err(ChronError::corrupt(format!(
                "object body length mismatch: header says {}, got {}",
                body_len,
                body.len()
            )));
        }
        match kind {
            "blob" => Ok(Object::Blob(body.to_vec())),
            "tree" => parse_tree_body(body).map(Object::Tree),
            "commit" => parse_commit_body(body).map(Object::Commit),
            other => Err(ChronError::corrupt(format!("unknown object kind: {}", other))),
        }
    }
}

fn parse_tree_body(body: &[u8]) -> ChronResult<Tree> {
    let mut entries = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        let space = rest
            .iter()
            .position(|&b| b == b' ')
            .ok_or_else(|| ChronError::corrupt("tree entry missing mode separator"))?;
        let mode = EntryMode::parse(
            std::str::from_utf8(&rest[..space])
                .map_err(|_| ChronError::corrupt("tree entry mode is not UTF-8"))?,
        )?;
        rest = &rest[space + 1..];
        let nul = rest
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| ChronError::corrupt("tree entry missing name terminator"))?;
        let name = std::str::from_utf8(&rest[..nul])
            .map_err(|_| ChronError::corrupt("tree entry name is not UTF-8"))?
            .to_string();
        rest = &rest[nul + 1..];
        let hex_len = chrondb_core::OBJECT_ID_HEX_LEN;
        if rest.len() < hex_len + 1 || rest[hex_len] != b'\n' {
            return Err(ChronError::corrupt("tree entry id is malformed"));
        }
        let id_hex = std::str::from_utf8(&rest[..hex_len])
            .map_err(|_| ChronError::corrupt("tree entry id is not UTF-8"))?;
        let id = ObjectId::from_hex(id_hex).map_err(|_| {
            ChronError::corrupt(format!("tree entry id is not valid hex: {}", id_hex))
        })?;
        rest = &rest[hex_len + 1..];
        entries.push(TreeEntry { name, mode, id });
    }
    // from_entries re-sorts; a canonical body is already sorted, but parsing
    // stays tolerant of nothing else.
    Tree::from_entries(entries)
}

fn parse_commit_body(body: &[u8]) -> ChronResult<Commit> {
    let text = std::str::from_utf8(body)
        .map_err(|_| ChronError::corrupt("commit body is not UTF-8"))?;
    let (header, message) = text
        .split_once("\n\n")
        .ok_or_else(|| ChronError::corrupt("commit body missing blank separator"))?;

    let mut tree = None;
    let mut parents = Vec::new();
    let mut author = None;
    let mut committer = None;
    let mut timestamp_ms = None;

    for line in header.lines() {
        let (key, value) = line
            .split_once(' ')
            .ok_or_else(|| ChronError::corrupt(format!("malformed commit line: {}", line)))?;
        match key {
            "tree" => tree = Some(ObjectId::from_hex(value).map_err(to_corrupt)?),
            "parent" => parents.push(ObjectId::from_hex(value).map_err(to_corrupt)?),
            "author" => author = Some(value.to_string()),
            "committer" => committer = Some(value.to_string()),
            "timestamp" => {
                timestamp_ms = Some(value.parse::<i64>().map_err(|_| {
                    ChronError::corrupt(format!("bad commit timestamp: {}", value))
                })?)
            }
            other => return Err(ChronError::corrupt(format!("unknown commit field: {}", other))),
        }
    }
    if parents.len() > 2 {
        return Err(ChronError::corrupt("commit has more than two parents"));
    }
    Ok(Commit {
        tree: tree.ok_or_else(|| ChronError::corrupt("commit missing tree"))?,
        parents,
        author: author.ok_or_else(|| ChronError::corrupt("commit missing author"))?,
        committer: committer.ok_or_else(|| ChronError::corrupt("commit missing committer"))?,
        timestamp_ms: timestamp_ms.ok_or_else(|| ChronError::corrupt("commit missing timestamp"))?,
        message: message.to_string(),
    })
}

fn to_corrupt(e: ChronError) -> ChronError {
    ChronError::corrupt(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn some_id(seed: u8) -> ObjectId {
        ObjectId::hash(&[seed])
    }

    #[test]
    fn test_blob_round_trip() {
        let obj = Object::Blob(b"hello world".to_vec());
        let bytes = obj.canonical_bytes();
        let back = Object::parse(&bytes).unwrap();
        assert_eq!(obj, back);
        assert_eq!(obj.id(), back.id());
    }

    #[test]
    fn test_empty_blob_round_trip() {
        let obj = Object::Blob(Vec::new());
        let back = Object::parse(&obj.canonical_bytes()).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn test_tree_entries_sorted_canonically() {
        let tree = Tree::from_entries(vec![
            TreeEntry {
                name: "zebra".to_string(),
                mode: EntryMode::File,
                id: some_id(1),
            },
            TreeEntry {
                name: "apple".to_string(),
                mode: EntryMode::Dir,
                id: some_id(2),
            },
        ])
        .unwrap();
        assert_eq!(tree.entries()[0].name, "apple");
        assert_eq!(tree.entries()[1].name, "zebra");

        let obj = Object::Tree(tree.clone());
        let back = Object::parse(&obj.canonical_bytes()).unwrap();
        assert_eq!(obj, back);
    }

    #[test]
    fn test_tree_ids_independent_of_insertion_order() {
        let a = Tree::from_entries(vec![
            TreeEntry {
                name: "a".to_string(),
                mode: EntryMode::File,
                id: some_id(1),
            },
            TreeEntry {
                name: "b".to_string(),
                mode: EntryMode::File,
                id: some_id(2),
            },
        ])
        .unwrap();
        let b = Tree::empty()
            .with_entry(TreeEntry {
                name: "b".to_string(),
                mode: EntryMode::File,
                id: some_id(2),
            })
            .unwrap()
            .with_entry(TreeEntry {
                name: "a".to_string(),
                mode: EntryMode::File,
                id: some_id(1),
            })
            .unwrap();
        assert_eq!(Object::Tree(a).id(), Object::Tree(b).id());
    }

    #[test]
    fn test_tree_rejects_duplicates_and_bad_names() {
        let dup = Tree::from_entries(vec![
            TreeEntry {
                name: "x".to_string(),
                mode: EntryMode::File,
                id: some_id(1),
            },
            TreeEntry {
                name: "x".to_string(),
                mode: EntryMode::File,
                id: some_id(2),
            },
        ]);
        assert!(dup.is_err());
        assert!(Tree::empty()
            .with_entry(TreeEntry {
                name: "a/b".to_string(),
                mode: EntryMode::File,
                id: some_id(1),
            })
            .is_err());
        assert!(Tree::empty()
            .with_entry(TreeEntry {
                name: "..".to_string(),
                mode: EntryMode::Dir,
                id: some_id(1),
            })
            .is_err());
    }

    #[test]
    fn test_tree_edits_are_persistent_values() {
        let base = Tree::empty()
            .with_entry(TreeEntry {
                name: "keep".to_string(),
                mode: EntryMode::File,
                id: some_id(1),
            })
            .unwrap();
        let edited = base
            .with_entry(TreeEntry {
                name: "new".to_string(),
                mode: EntryMode::File,
                id: some_id(2),
            })
            .unwrap();
        assert_eq!(base.len(), 1);
        assert_eq!(edited.len(), 2);
        let removed = edited.without_entry("keep");
        assert!(removed.get("keep").is_none());
        assert!(edited.get("keep").is_some());
        // Removing a missing name is a no-op
        assert_eq!(removed.without_entry("ghost"), removed);
    }

    #[test]
    fn test_commit_round_trip() {
        let commit = Commit {
            tree: some_id(1),
            parents: vec![some_id(2)],
            author: "rest-user".to_string(),
            committer: "ChronDB <chrondb@localhost>".to_string(),
            timestamp_ms: 1_722_470_400_000,
            message: "put user:1".to_string(),
        };
        let obj = Object::Commit(commit.clone());
        let back = Object::parse(&obj.canonical_bytes()).unwrap();
        assert_eq!(obj, back);
        match back {
            Object::Commit(c) => {
                assert_eq!(c.first_parent(), Some(some_id(2)));
                assert_eq!(c.message, "put user:1");
            }
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_root_commit_has_no_parents() {
        let commit = Commit {
            tree: some_id(1),
            parents: vec![],
            author: "internal".to_string(),
            committer: "ChronDB <chrondb@localhost>".to_string(),
            timestamp_ms: 0,
            message: "Initial commit".to_string(),
        };
        let back = Object::parse(&Object::Commit(commit.clone()).canonical_bytes()).unwrap();
        match back {
            Object::Commit(c) => {
                assert!(c.parents.is_empty());
                assert!(c.first_parent().is_none());
            }
            _ => panic!("wrong kind"),
        }
    }

    #[test]
    fn test_multiline_commit_message_round_trip() {
        let commit = Commit {
            tree: some_id(1),
            parents: vec![],
            author: "a".to_string(),
            committer: "c".to_string(),
            timestamp_ms: 1,
            message: "Restore user:1\n\nto commit abcd".to_string(),
        };
        let back = Object::parse(&Object::Commit(commit.clone()).canonical_bytes()).unwrap();
        assert_eq!(Object::Commit(commit), back);
    }

    #[test]
    fn test_parse_rejects_corruption() {
        assert!(Object::parse(b"").is_err());
        assert!(Object::parse(b"blob x\n").is_err());
        assert!(Object::parse(b"blob 5\nab").is_err()); // length mismatch
        assert!(Object::parse(b"weird 0\n").is_err());
        let err = Object::parse(b"commit 3\nabc").unwrap_err();
        assert!(matches!(err, ChronError::StoreCorrupt { .. }));
    }

    #[test]
    fn test_identical_content_same_id() {
        let a = Object::Blob(b"same".to_vec());
        let b = Object::Blob(b"same".to_vec());
        assert_eq!(a.id(), b.id());
        let c = Object::Blob(b"other".to_vec());
        assert_ne!(a.id(), c.id());
    }
}
