//! Filesystem collaborator interface.
//!
//! The engine never touches storage directly; handlers go through
//! [`Filesystem`], and every failure carries the reply code and error name
//! the dispatch boundary forwards verbatim. [`MemoryFilesystem`] is the
//! in-crate implementation used by the demo binary and the tests.

use std::{
    collections::HashMap,
    io::Cursor,
    sync::{Arc, Mutex},
    time::SystemTime,
};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// A failure reported by the filesystem layer.
///
/// `code` and `name` travel to the client unchanged; the dispatch pipeline
/// renders them as `code name: message`.
#[derive(Clone, Debug)]
pub struct FsError {
    code: u16,
    name: &'static str,
    message: String,
}

impl FsError {
    /// Create an error with an explicit reply code and error name.
    #[must_use]
    pub fn new(code: u16, name: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            name,
            message: message.into(),
        }
    }

    /// The entry does not exist.
    #[must_use]
    pub fn not_found() -> Self {
        Self::new(550, "FileUnavailable", "File system entry not found.")
    }

    /// The target name is already taken.
    #[must_use]
    pub fn already_exists() -> Self {
        Self::new(553, "FileNameNotAllowed", "File system entry already exists.")
    }

    /// A file stood where a directory was required.
    #[must_use]
    pub fn not_a_directory(name: &str) -> Self {
        Self::new(550, "FileUnavailable", format!("{name} is not a directory."))
    }

    /// The reply code chosen by the filesystem layer.
    #[must_use]
    pub fn code(&self) -> u16 { self.code }

    /// Short machine-readable error name.
    #[must_use]
    pub fn name(&self) -> &'static str { self.name }

    /// Human-readable detail, possibly empty.
    #[must_use]
    pub fn message(&self) -> &str { &self.message }
}

impl std::fmt::Display for FsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.message.is_empty() {
            write!(f, "{} {}", self.code, self.name)
        } else {
            write!(f, "{} {}: {}", self.code, self.name, self.message)
        }
    }
}

impl std::error::Error for FsError {}

/// Metadata for one directory entry.
#[derive(Clone, Debug)]
pub struct Metadata {
    /// Entry name without any path component.
    pub name: String,
    /// Size in bytes; zero for directories.
    pub size: u64,
    /// Last modification time, when the backend tracks one.
    pub modified: Option<SystemTime>,
    /// Whether the entry is a directory.
    pub is_dir: bool,
}

/// How [`Filesystem::open_write`] positions the new stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or truncate.
    Create,
    /// Keep existing content up to the offset and continue from there.
    Resume(u64),
    /// Append to the existing content.
    Append,
}

/// Writable stream returned by the filesystem; content is committed when the
/// stream is shut down.
pub trait FileSink: AsyncWrite + Send + Unpin {}

impl<T> FileSink for T where T: AsyncWrite + Send + Unpin {}

/// Storage backend consumed by the command handlers.
///
/// All paths are absolute, `/`-separated and already resolved against the
/// session's working directory (see [`resolve_path`]).
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Look up a single entry.
    async fn metadata(&self, path: &str) -> Result<Metadata, FsError>;

    /// List a directory's entries.
    async fn list(&self, path: &str) -> Result<Vec<Metadata>, FsError>;

    /// Create a directory; parents must exist.
    async fn create_dir(&self, path: &str) -> Result<(), FsError>;

    /// Remove an empty directory.
    async fn remove_dir(&self, path: &str) -> Result<(), FsError>;

    /// Remove a file.
    async fn remove_file(&self, path: &str) -> Result<(), FsError>;

    /// Rename or move an entry.
    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError>;

    /// Set an entry's modification time.
    async fn set_modified(&self, path: &str, modified: SystemTime) -> Result<(), FsError>;

    /// Open a file for reading, starting at `offset`.
    async fn open_read(
        &self,
        path: &str,
        offset: u64,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, FsError>;

    /// Open a file for writing.
    async fn open_write(&self, path: &str, mode: WriteMode) -> Result<Box<dyn FileSink>, FsError>;
}

/// Resolve an FTP path argument against a working-directory stack.
///
/// Handles absolute arguments, `.` and `..` components and redundant
/// separators; the result is always absolute.
#[must_use]
pub fn resolve_path(cwd: &[String], argument: &str) -> String {
    let mut parts: Vec<&str> = if argument.starts_with('/') {
        Vec::new()
    } else {
        cwd.iter().map(String::as_str).collect()
    };

    for part in argument.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        "/".to_owned()
    } else {
        format!("/{}", parts.join("/"))
    }
}

#[derive(Default)]
struct DirNode {
    entries: HashMap<String, Node>,
}

enum Node {
    Dir(DirNode),
    File(FileNode),
}

struct FileNode {
    data: Vec<u8>,
    modified: SystemTime,
}

/// In-memory [`Filesystem`] backing the demo binary and the test suite.
#[derive(Clone, Default)]
pub struct MemoryFilesystem {
    root: Arc<Mutex<DirNode>>,
}

impl MemoryFilesystem {
    /// Create an empty tree.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Pre-create a directory, including parents.
    ///
    /// # Panics
    ///
    /// Panics when a file already occupies part of the path; seeding happens
    /// before the filesystem is shared.
    pub fn seed_dir(&self, path: &str) {
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let mut dir = &mut *root;
        for part in split(path) {
            let node = dir
                .entries
                .entry(part.to_owned())
                .or_insert_with(|| Node::Dir(DirNode::default()));
            match node {
                Node::Dir(next) => dir = next,
                Node::File(_) => panic!("seed path {path} crosses a file"),
            }
        }
    }

    /// Pre-create a file, including parent directories.
    ///
    /// # Panics
    ///
    /// Panics when a file already occupies a parent component.
    pub fn seed_file(&self, path: &str, data: impl Into<Vec<u8>>) {
        let (parent, name) = parent_and_name(path);
        self.seed_dir(&parent);
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let dir = locate_dir_mut(&mut root, &parent).expect("parent was just created");
        dir.entries.insert(
            name,
            Node::File(FileNode {
                data: data.into(),
                modified: SystemTime::now(),
            }),
        );
    }

    fn commit(&self, path: &str, data: Vec<u8>) -> Result<(), FsError> {
        let (parent, name) = parent_and_name(path);
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let dir = locate_dir_mut(&mut root, &parent).ok_or_else(FsError::not_found)?;
        dir.entries.insert(
            name,
            Node::File(FileNode {
                data,
                modified: SystemTime::now(),
            }),
        );
        Ok(())
    }
}

fn split(path: &str) -> impl DoubleEndedIterator<Item = &str> {
    path.split('/').filter(|part| !part.is_empty())
}

fn parent_and_name(path: &str) -> (String, String) {
    let mut parts: Vec<&str> = split(path).collect();
    let name = parts.pop().unwrap_or_default().to_owned();
    (format!("/{}", parts.join("/")), name)
}

fn locate<'a>(root: &'a DirNode, path: &str) -> Option<&'a Node> {
    let mut parts = split(path).peekable();
    parts.peek()?;

    let mut dir = root;
    loop {
        let part = parts.next()?;
        let node = dir.entries.get(part)?;
        if parts.peek().is_none() {
            return Some(node);
        }
        match node {
            Node::Dir(next) => dir = next,
            Node::File(_) => return None,
        }
    }
}

fn locate_dir_mut<'a>(root: &'a mut DirNode, path: &str) -> Option<&'a mut DirNode> {
    let mut dir = root;
    for part in split(path) {
        match dir.entries.get_mut(part)? {
            Node::Dir(next) => dir = next,
            Node::File(_) => return None,
        }
    }
    Some(dir)
}

fn metadata_of(name: &str, node: &Node) -> Metadata {
    match node {
        Node::Dir(_) => Metadata {
            name: name.to_owned(),
            size: 0,
            modified: None,
            is_dir: true,
        },
        Node::File(file) => Metadata {
            name: name.to_owned(),
            size: file.data.len() as u64,
            modified: Some(file.modified),
            is_dir: false,
        },
    }
}

#[async_trait]
impl Filesystem for MemoryFilesystem {
    async fn metadata(&self, path: &str) -> Result<Metadata, FsError> {
        let root = self.root.lock().expect("filesystem lock poisoned");
        if split(path).next().is_none() {
            return Ok(Metadata {
                name: "/".to_owned(),
                size: 0,
                modified: None,
                is_dir: true,
            });
        }
        let node = locate(&root, path).ok_or_else(FsError::not_found)?;
        let name = split(path).next_back().unwrap_or("/");
        Ok(metadata_of(name, node))
    }

    async fn list(&self, path: &str) -> Result<Vec<Metadata>, FsError> {
        let root = self.root.lock().expect("filesystem lock poisoned");
        let dir = if split(path).next().is_none() {
            &*root
        } else {
            match locate(&root, path) {
                Some(Node::Dir(dir)) => dir,
                Some(Node::File(_)) => {
                    let name = split(path).next_back().unwrap_or_default();
                    return Err(FsError::not_a_directory(name));
                }
                None => return Err(FsError::not_found()),
            }
        };
        let mut entries: Vec<Metadata> = dir
            .entries
            .iter()
            .map(|(name, node)| metadata_of(name, node))
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn create_dir(&self, path: &str) -> Result<(), FsError> {
        let (parent, name) = parent_and_name(path);
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let dir = locate_dir_mut(&mut root, &parent).ok_or_else(FsError::not_found)?;
        if dir.entries.contains_key(&name) {
            return Err(FsError::already_exists());
        }
        dir.entries.insert(name, Node::Dir(DirNode::default()));
        Ok(())
    }

    async fn remove_dir(&self, path: &str) -> Result<(), FsError> {
        let (parent, name) = parent_and_name(path);
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let dir = locate_dir_mut(&mut root, &parent).ok_or_else(FsError::not_found)?;
        match dir.entries.get(&name) {
            Some(Node::Dir(target)) if target.entries.is_empty() => {
                dir.entries.remove(&name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(FsError::new(
                550,
                "FileUnavailable",
                "Directory is not empty.",
            )),
            Some(Node::File(_)) => Err(FsError::not_a_directory(&name)),
            None => Err(FsError::not_found()),
        }
    }

    async fn remove_file(&self, path: &str) -> Result<(), FsError> {
        let (parent, name) = parent_and_name(path);
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let dir = locate_dir_mut(&mut root, &parent).ok_or_else(FsError::not_found)?;
        match dir.entries.get(&name) {
            Some(Node::File(_)) => {
                dir.entries.remove(&name);
                Ok(())
            }
            Some(Node::Dir(_)) => Err(FsError::new(550, "FileUnavailable", "Entry is a directory.")),
            None => Err(FsError::not_found()),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), FsError> {
        let (from_parent, from_name) = parent_and_name(from);
        let (to_parent, to_name) = parent_and_name(to);
        let mut root = self.root.lock().expect("filesystem lock poisoned");

        // Validate the target before detaching the source, so a failed
        // rename leaves the tree untouched.
        {
            let target = locate_dir_mut(&mut root, &to_parent).ok_or_else(FsError::not_found)?;
            if target.entries.contains_key(&to_name) {
                return Err(FsError::already_exists());
            }
        }

        let node = locate_dir_mut(&mut root, &from_parent)
            .ok_or_else(FsError::not_found)?
            .entries
            .remove(&from_name)
            .ok_or_else(FsError::not_found)?;
        let target = locate_dir_mut(&mut root, &to_parent).ok_or_else(FsError::not_found)?;
        target.entries.insert(to_name, node);
        Ok(())
    }

    async fn set_modified(&self, path: &str, modified: SystemTime) -> Result<(), FsError> {
        let mut root = self.root.lock().expect("filesystem lock poisoned");
        let (parent, name) = parent_and_name(path);
        let dir = locate_dir_mut(&mut root, &parent).ok_or_else(FsError::not_found)?;
        match dir.entries.get_mut(&name) {
            Some(Node::File(file)) => {
                file.modified = modified;
                Ok(())
            }
            Some(Node::Dir(_)) => Ok(()),
            None => Err(FsError::not_found()),
        }
    }

    async fn open_read(
        &self,
        path: &str,
        offset: u64,
    ) -> Result<Box<dyn AsyncRead + Send + Unpin>, FsError> {
        let root = self.root.lock().expect("filesystem lock poisoned");
        match locate(&root, path) {
            Some(Node::File(file)) => {
                let mut cursor = Cursor::new(file.data.clone());
                cursor.set_position(offset.min(file.data.len() as u64));
                Ok(Box::new(cursor))
            }
            Some(Node::Dir(_)) => Err(FsError::new(550, "FileUnavailable", "Entry is a directory.")),
            None => Err(FsError::not_found()),
        }
    }

    async fn open_write(&self, path: &str, mode: WriteMode) -> Result<Box<dyn FileSink>, FsError> {
        let (parent, _) = parent_and_name(path);
        let existing = {
            let mut root = self.root.lock().expect("filesystem lock poisoned");
            locate_dir_mut(&mut root, &parent).ok_or_else(FsError::not_found)?;
            match locate(&root, path) {
                Some(Node::File(file)) => Some(file.data.clone()),
                Some(Node::Dir(_)) => {
                    return Err(FsError::new(550, "FileUnavailable", "Entry is a directory."));
                }
                None => None,
            }
        };

        let buffer = match (mode, existing) {
            (WriteMode::Create, _) | (_, None) => Vec::new(),
            (WriteMode::Append, Some(data)) => data,
            (WriteMode::Resume(offset), Some(mut data)) => {
                data.truncate(usize::try_from(offset).unwrap_or(usize::MAX).min(data.len()));
                data
            }
        };

        Ok(Box::new(MemoryWriter {
            fs: self.clone(),
            path: path.to_owned(),
            buffer,
            committed: false,
        }))
    }
}

struct MemoryWriter {
    fs: MemoryFilesystem,
    path: String,
    buffer: Vec<u8>,
    committed: bool,
}

impl AsyncWrite for MemoryWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        self.buffer.extend_from_slice(buf);
        std::task::Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(
        self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        if !self.committed {
            self.committed = true;
            let data = std::mem::take(&mut self.buffer);
            let result = self.fs.commit(&self.path, data);
            if let Err(e) = result {
                return std::task::Poll::Ready(Err(std::io::Error::other(e)));
            }
        }
        std::task::Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::{Filesystem, FsError, MemoryFilesystem, WriteMode, resolve_path};

    fn cwd(parts: &[&str]) -> Vec<String> { parts.iter().map(|&p| p.to_owned()).collect() }

    #[rstest]
    #[case(&[], "", "/")]
    #[case(&[], "docs", "/docs")]
    #[case(&["srv"], "docs/a.txt", "/srv/docs/a.txt")]
    #[case(&["srv", "docs"], "..", "/srv")]
    #[case(&["srv"], "/other", "/other")]
    #[case(&["srv"], "./a//b", "/srv/a/b")]
    #[case(&[], "../..", "/")]
    fn resolves_paths(#[case] stack: &[&str], #[case] argument: &str, #[case] expected: &str) {
        assert_eq!(resolve_path(&cwd(stack), argument), expected);
    }

    #[tokio::test]
    async fn metadata_and_listing() {
        let fs = MemoryFilesystem::new();
        fs.seed_file("/docs/a.txt", b"hello".to_vec());
        fs.seed_dir("/docs/sub");

        let meta = fs.metadata("/docs/a.txt").await.expect("file exists");
        assert_eq!(meta.size, 5);
        assert!(!meta.is_dir);

        let entries = fs.list("/docs").await.expect("directory exists");
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["a.txt", "sub"]);
    }

    #[tokio::test]
    async fn missing_entries_report_550() {
        let fs = MemoryFilesystem::new();
        let err = fs.metadata("/nope").await.expect_err("entry is missing");
        assert_eq!(err.code(), 550);
        assert_eq!(err.name(), "FileUnavailable");
    }

    #[tokio::test]
    async fn rename_refuses_to_clobber() {
        let fs = MemoryFilesystem::new();
        fs.seed_file("/a", b"a".to_vec());
        fs.seed_file("/b", b"b".to_vec());
        let err = fs.rename("/a", "/b").await.expect_err("target exists");
        assert_eq!(err.code(), FsError::already_exists().code());
        // The source must survive the failed rename.
        assert!(fs.metadata("/a").await.is_ok());
    }

    #[tokio::test]
    async fn write_commits_on_shutdown() {
        let fs = MemoryFilesystem::new();
        let mut sink = fs
            .open_write("/new.txt", WriteMode::Create)
            .await
            .expect("root exists");
        sink.write_all(b"payload").await.expect("write succeeds");
        assert!(fs.metadata("/new.txt").await.is_err());

        sink.shutdown().await.expect("commit succeeds");
        let meta = fs.metadata("/new.txt").await.expect("file committed");
        assert_eq!(meta.size, 7);
    }

    #[tokio::test]
    async fn read_honours_offset() {
        let fs = MemoryFilesystem::new();
        fs.seed_file("/f", b"0123456789".to_vec());
        let mut reader = fs.open_read("/f", 4).await.expect("file exists");
        let mut out = String::new();
        reader.read_to_string(&mut out).await.expect("read succeeds");
        assert_eq!(out, "456789");
    }
}
