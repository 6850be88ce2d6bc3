// # In-Memory File System
//
// A fully in-memory filesystem with the features of a real one, including
// change notifications. Used as a mock depot in tests and tooling.
//
// Deletion is a *soft* flag: content stays put so readers opened earlier
// keep working, while lookups treat the entry as gone. A move is a
// soft-delete plus re-add and re-issues add events on the destination.
//
// Mutation happens under one lock over the tree; watcher events collected
// during an operation are dispatched after the lock is released, so listener
// misbehavior cannot corrupt or deadlock the filesystem itself.

use crate::file::memory_reader::reader_from_bytes;
use crate::file::reader::FileReader;
use crate::file::watcher::{DirectoryWatcher, WatcherEvent, WatcherEventType};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};

// ============================================================================
// Tree nodes
// ============================================================================

struct FileNode {
    parent: usize,
    name: String,
    content: Bytes,
    timestamp: DateTime<Utc>,
    readonly: bool,
    deleted: bool,
}

struct DirNode {
    parent: Option<usize>,
    name: String,
    files: Vec<usize>,
    dirs: Vec<usize>,
    deleted: bool,
}

struct FsTree {
    dirs: Vec<DirNode>,
    files: Vec<FileNode>,
}

const ROOT: usize = 0;

impl FsTree {
    fn new() -> Self {
        Self {
            dirs: vec![DirNode {
                parent: None,
                name: String::new(),
                files: Vec::new(),
                dirs: Vec::new(),
                deleted: false,
            }],
            files: Vec::new(),
        }
    }

    //--

    fn find_dir(&self, path: &str) -> Option<usize> {
        let mut dir = ROOT;
        for part in path.split('/').filter(|part| !part.is_empty()) {
            let child = self.dirs[dir]
                .dirs
                .iter()
                .copied()
                .find(|&child| !self.dirs[child].deleted && self.dirs[child].name == part)?;
            dir = child;
        }
        Some(dir)
    }

    fn find_file(&self, path: &str) -> Option<usize> {
        let (dir_path, file_name) = split_path(path);
        let dir = self.find_dir(dir_path)?;
        self.dirs[dir]
            .files
            .iter()
            .copied()
            .find(|&file| !self.files[file].deleted && self.files[file].name == file_name)
    }

    /// Find a file entry by name inside a directory, deleted ones included.
    fn find_file_slot(&self, dir: usize, file_name: &str) -> Option<usize> {
        self.dirs[dir]
            .files
            .iter()
            .copied()
            .find(|&file| self.files[file].name == file_name)
    }

    //--

    fn dir_abs_path(&self, mut dir: usize) -> String {
        let mut parts = Vec::new();
        while let Some(parent) = self.dirs[dir].parent {
            parts.push(self.dirs[dir].name.clone());
            dir = parent;
        }
        parts.reverse();

        let mut path = String::from("/");
        for part in parts {
            path.push_str(&part);
            path.push('/');
        }
        path
    }

    fn file_abs_path(&self, file: usize) -> String {
        let mut path = self.dir_abs_path(self.files[file].parent);
        path.push_str(&self.files[file].name);
        path
    }

    //--

    /// Create (or resurrect) every directory along `path`. A trailing
    /// component without a slash is treated as a file name and skipped.
    fn create_path(&mut self, path: &str, events: &mut Vec<WatcherEvent>) -> usize {
        let mut parts: Vec<&str> = path.split('/').filter(|part| !part.is_empty()).collect();
        if !path.ends_with('/') && !parts.is_empty() {
            parts.pop();
        }

        let mut dir = ROOT;
        for part in parts {
            let existing = self.dirs[dir]
                .dirs
                .iter()
                .copied()
                .find(|&child| self.dirs[child].name == part);

            dir = match existing {
                Some(child) => {
                    if self.dirs[child].deleted {
                        self.dirs[child].deleted = false;
                        events.push(WatcherEvent {
                            kind: WatcherEventType::DirectoryAdded,
                            path: self.dir_abs_path(child),
                        });
                    }
                    child
                }
                None => {
                    let child = self.dirs.len();
                    self.dirs.push(DirNode {
                        parent: Some(dir),
                        name: part.to_string(),
                        files: Vec::new(),
                        dirs: Vec::new(),
                        deleted: false,
                    });
                    self.dirs[dir].dirs.push(child);
                    events.push(WatcherEvent {
                        kind: WatcherEventType::DirectoryAdded,
                        path: self.dir_abs_path(child),
                    });
                    child
                }
            };
        }

        dir
    }

    /// Store or overwrite a file in an existing directory, resurrecting a
    /// soft-deleted entry when the name matches one.
    fn update_file(
        &mut self,
        path: &str,
        content: Bytes,
        timestamp: DateTime<Utc>,
        events: &mut Vec<WatcherEvent>,
    ) -> bool {
        let (dir_path, file_name) = split_path(path);
        let Some(dir) = self.find_dir(dir_path) else {
            return false;
        };

        if let Some(file) = self.find_file_slot(dir, file_name) {
            let was_deleted = self.files[file].deleted;
            self.files[file].content = content;
            self.files[file].timestamp = timestamp;
            self.files[file].deleted = false;

            events.push(WatcherEvent {
                kind: if was_deleted {
                    WatcherEventType::FileAdded
                } else {
                    WatcherEventType::FileContentChanged
                },
                path: self.file_abs_path(file),
            });
        } else {
            let file = self.files.len();
            self.files.push(FileNode {
                parent: dir,
                name: file_name.to_string(),
                content,
                timestamp,
                readonly: false,
                deleted: false,
            });
            self.dirs[dir].files.push(file);

            events.push(WatcherEvent {
                kind: WatcherEventType::FileAdded,
                path: self.file_abs_path(file),
            });
        }

        true
    }
}

/// Split an absolute file path into its directory part (with the trailing
/// slash) and the file name.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(slash) => (&path[..slash + 1], &path[slash + 1..]),
        None => ("/", path),
    }
}

/// Two-glyph wildcard match: `*` any sequence, `?` any single character.
fn match_pattern(name: &str, pattern: &str) -> bool {
    fn matches(name: &[u8], pattern: &[u8]) -> bool {
        match (pattern.first(), name.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(b'*'), _) => {
                matches(name, &pattern[1..])
                    || (!name.is_empty() && matches(&name[1..], pattern))
            }
            (Some(b'?'), Some(_)) => matches(&name[1..], &pattern[1..]),
            (Some(&glyph), Some(&chr)) => glyph == chr && matches(&name[1..], &pattern[1..]),
            (Some(_), None) => false,
        }
    }
    matches(name.as_bytes(), pattern.as_bytes())
}

fn validate_file_path(path: &str) -> bool {
    path.starts_with('/') && !path.ends_with('/')
}

fn validate_dir_path(path: &str) -> bool {
    path.starts_with('/')
}

// ============================================================================
// File system
// ============================================================================

/// Write mode for [`MemoryFileSystem::open_for_writing`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileWriteMode {
    /// Start from an empty file.
    Truncate,
    /// Preload the current content of the file, if any.
    ReadWrite,
}

/// Fully in-memory mock file system with change notifications.
pub struct MemoryFileSystem {
    tree: Mutex<FsTree>,
    watchers: Mutex<Vec<Weak<DirectoryWatcher>>>,
}

impl Default for MemoryFileSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(FsTree::new()),
            watchers: Mutex::new(Vec::new()),
        }
    }

    fn dispatch_events(&self, events: Vec<WatcherEvent>) {
        if events.is_empty() {
            return;
        }

        let live: Vec<Arc<DirectoryWatcher>> = {
            let mut watchers = self.watchers.lock();
            watchers.retain(|watcher| watcher.strong_count() > 0);
            watchers.iter().filter_map(|watcher| watcher.upgrade()).collect()
        };

        for event in &events {
            for watcher in &live {
                watcher.dispatch_event(event);
            }
        }
    }

    //--

    /// Seed a file; fails when the file already exists. Creates missing
    /// directories along the way without issuing events.
    pub fn store_content(&self, path: &str, content: Bytes, timestamp: DateTime<Utc>) -> bool {
        debug_assert!(validate_file_path(path), "invalid file path");
        if !validate_file_path(path) {
            return false;
        }

        let mut tree = self.tree.lock();

        // seeding is silent, so the directory events go nowhere
        let mut ignored = Vec::new();
        let (dir_path, file_name) = split_path(path);
        let dir = tree.create_path(dir_path, &mut ignored);

        if tree.find_file_slot(dir, file_name).is_some() {
            return false;
        }

        let file = tree.files.len();
        tree.files.push(FileNode {
            parent: dir,
            name: file_name.to_string(),
            content,
            timestamp,
            readonly: false,
            deleted: false,
        });
        tree.dirs[dir].files.push(file);
        true
    }

    /// Seed a text file with the current timestamp.
    pub fn store_text(&self, path: &str, content: &str) -> bool {
        self.store_content(path, Bytes::copy_from_slice(content.as_bytes()), Utc::now())
    }

    /// Replace or create a file as if an external process wrote it; issues
    /// the matching change events. Requires the directory to exist.
    pub fn update_content_external(
        &self,
        path: &str,
        content: Bytes,
        timestamp: DateTime<Utc>,
    ) -> bool {
        debug_assert!(validate_file_path(path), "invalid file path");
        if !validate_file_path(path) {
            return false;
        }

        let mut events = Vec::new();
        let updated = self.tree.lock().update_file(path, content, timestamp, &mut events);
        self.dispatch_events(events);
        updated
    }

    /// Current content of a file; deleted files are not found.
    pub fn load_content(&self, path: &str) -> Option<Bytes> {
        let tree = self.tree.lock();
        let file = tree.find_file(path)?;
        Some(tree.files[file].content.clone())
    }

    /// Current content of a file as text.
    pub fn load_text(&self, path: &str) -> Option<String> {
        let content = self.load_content(path)?;
        String::from_utf8(content.to_vec()).ok()
    }

    pub fn has_file(&self, path: &str) -> bool {
        self.tree.lock().find_file(path).is_some()
    }

    pub fn has_directory(&self, path: &str) -> bool {
        self.tree.lock().find_dir(path).is_some()
    }

    //--

    /// Open a file for reading. Missing or deleted files yield `None`.
    pub fn open_for_reading(&self, path: &str) -> Option<Arc<dyn FileReader>> {
        let tree = self.tree.lock();
        let file = tree.find_file(path)?;
        // the reader shares the content buffer, so the handle stays readable
        // even if the file is deleted or replaced afterwards
        Some(reader_from_bytes(
            tree.files[file].content.clone(),
            path.to_string(),
        ))
    }

    /// Open a file for writing; content lands in the filesystem when the
    /// writer is dropped. Requires the parent directory to exist.
    pub fn open_for_writing(
        self: Arc<Self>,
        path: &str,
        mode: FileWriteMode,
    ) -> Option<MemoryFileWriter> {
        debug_assert!(validate_file_path(path), "invalid file path");

        let preload = {
            let tree = self.tree.lock();
            let (dir_path, _) = split_path(path);
            tree.find_dir(dir_path)?;

            match mode {
                FileWriteMode::Truncate => Vec::new(),
                FileWriteMode::ReadWrite => tree
                    .find_file(path)
                    .map(|file| tree.files[file].content.to_vec())
                    .unwrap_or_default(),
            }
        };

        Some(MemoryFileWriter {
            fs: self,
            path: path.to_string(),
            data: preload,
        })
    }

    //--

    /// Create every directory along `path` (a trailing component without a
    /// slash is treated as a file name).
    pub fn create_path(&self, path: &str) -> bool {
        debug_assert!(validate_dir_path(path), "invalid directory path");
        if !validate_dir_path(path) {
            return false;
        }

        let mut events = Vec::new();
        self.tree.lock().create_path(path, &mut events);
        self.dispatch_events(events);
        true
    }

    /// Move a file. Fails when the source is missing, the destination exists
    /// or the destination directory is missing. The timestamp travels with
    /// the file; events are a removal plus an addition.
    pub fn move_file(&self, src_path: &str, dest_path: &str) -> bool {
        let mut events = Vec::new();
        let moved = {
            let mut tree = self.tree.lock();

            let Some(src) = tree.find_file(src_path) else {
                return false;
            };
            if tree.find_file(dest_path).is_some() {
                return false;
            }
            let (dest_dir_path, _) = split_path(dest_path);
            if tree.find_dir(dest_dir_path).is_none() {
                return false;
            }

            let content = tree.files[src].content.clone();
            let timestamp = tree.files[src].timestamp;

            tree.files[src].deleted = true;
            events.push(WatcherEvent {
                kind: WatcherEventType::FileRemoved,
                path: tree.file_abs_path(src),
            });

            if !tree.update_file(dest_path, content, timestamp, &mut events) {
                // roll back the soft delete
                tree.files[src].deleted = false;
                events.push(WatcherEvent {
                    kind: WatcherEventType::FileAdded,
                    path: tree.file_abs_path(src),
                });
                false
            } else {
                true
            }
        };

        self.dispatch_events(events);
        moved
    }

    /// Copy a file. Fails when the source is missing, the destination exists
    /// or the destination directory is missing. The source stays intact and
    /// the copy keeps its timestamp.
    pub fn copy_file(&self, src_path: &str, dest_path: &str) -> bool {
        let mut events = Vec::new();
        let copied = {
            let mut tree = self.tree.lock();

            let Some(src) = tree.find_file(src_path) else {
                return false;
            };
            if tree.find_file(dest_path).is_some() {
                return false;
            }
            let (dest_dir_path, _) = split_path(dest_path);
            if tree.find_dir(dest_dir_path).is_none() {
                return false;
            }

            let content = tree.files[src].content.clone();
            let timestamp = tree.files[src].timestamp;
            tree.update_file(dest_path, content, timestamp, &mut events)
        };

        self.dispatch_events(events);
        copied
    }

    /// Soft-delete a file. Existing read handles keep their content.
    pub fn delete_file(&self, path: &str) -> bool {
        let mut events = Vec::new();
        let deleted = {
            let mut tree = self.tree.lock();
            let Some(file) = tree.find_file(path) else {
                return false;
            };

            tree.files[file].deleted = true;
            events.push(WatcherEvent {
                kind: WatcherEventType::FileRemoved,
                path: tree.file_abs_path(file),
            });
            true
        };

        self.dispatch_events(events);
        deleted
    }

    /// Soft-delete a directory. Fails for the root or a directory that still
    /// has live files or subdirectories.
    pub fn delete_dir(&self, path: &str) -> bool {
        let mut events = Vec::new();
        let deleted = {
            let mut tree = self.tree.lock();
            let Some(dir) = tree.find_dir(path) else {
                return false;
            };
            if dir == ROOT {
                return false;
            }

            let has_live_files = tree.dirs[dir]
                .files
                .iter()
                .any(|&file| !tree.files[file].deleted);
            let has_live_dirs = tree.dirs[dir]
                .dirs
                .iter()
                .any(|&child| !tree.dirs[child].deleted);
            if has_live_files || has_live_dirs {
                return false;
            }

            tree.dirs[dir].deleted = true;
            events.push(WatcherEvent {
                kind: WatcherEventType::DirectoryRemoved,
                path: tree.dir_abs_path(dir),
            });
            true
        };

        self.dispatch_events(events);
        deleted
    }

    //--

    /// Timestamp and size of a file.
    pub fn file_info(&self, path: &str) -> Option<(DateTime<Utc>, u64)> {
        let tree = self.tree.lock();
        let file = tree.find_file(path)?;
        Some((
            tree.files[file].timestamp,
            tree.files[file].content.len() as u64,
        ))
    }

    /// Bump a file's timestamp to now.
    pub fn touch_file(&self, path: &str) -> bool {
        let mut events = Vec::new();
        let touched = {
            let mut tree = self.tree.lock();
            let Some(file) = tree.find_file(path) else {
                return false;
            };
            tree.files[file].timestamp = Utc::now();
            events.push(WatcherEvent {
                kind: WatcherEventType::FileContentChanged,
                path: tree.file_abs_path(file),
            });
            true
        };

        self.dispatch_events(events);
        touched
    }

    pub fn is_file_read_only(&self, path: &str) -> bool {
        let tree = self.tree.lock();
        tree.find_file(path)
            .map(|file| tree.files[file].readonly)
            .unwrap_or(false)
    }

    pub fn set_read_only(&self, path: &str, flag: bool) -> bool {
        let mut tree = self.tree.lock();
        match tree.find_file(path) {
            Some(file) => {
                tree.files[file].readonly = flag;
                true
            }
            None => false,
        }
    }

    //--

    /// Replace a file's content, or create the file if absent, issuing the
    /// matching events.
    pub fn save_file_from_buffer(
        &self,
        path: &str,
        data: &[u8],
        timestamp: Option<DateTime<Utc>>,
    ) -> bool {
        self.update_content_external(
            path,
            Bytes::copy_from_slice(data),
            timestamp.unwrap_or_else(Utc::now),
        )
    }

    /// Load a file's content; `None` for missing or deleted files.
    pub fn load_file_to_buffer(&self, path: &str) -> Option<Bytes> {
        self.load_content(path)
    }

    //--

    /// Enumerate files under `path`, filtered by a wildcard pattern. The
    /// callback gets the full path and the file name; returning true stops
    /// the walk. Do not call back into the filesystem from the callback.
    pub fn enum_files(
        &self,
        path: &str,
        pattern: &str,
        mut func: impl FnMut(&str, &str) -> bool,
        recurse: bool,
    ) -> bool {
        debug_assert!(validate_dir_path(path), "invalid directory path");

        let tree = self.tree.lock();
        let Some(start) = tree.find_dir(path) else {
            return false;
        };

        let mut stack = vec![start];
        while let Some(dir) = stack.pop() {
            for &file in &tree.dirs[dir].files {
                if tree.files[file].deleted {
                    continue;
                }
                if !match_pattern(&tree.files[file].name, pattern) {
                    continue;
                }
                let full_path = tree.file_abs_path(file);
                if func(&full_path, &tree.files[file].name) {
                    return true;
                }
            }

            if recurse {
                let mark = stack.len();
                for &child in &tree.dirs[dir].dirs {
                    if !tree.dirs[child].deleted {
                        stack.push(child);
                    }
                }
                stack[mark..].reverse();
            }
        }

        false
    }

    /// Enumerate live subdirectory names of `path`.
    pub fn enum_sub_dirs(&self, path: &str, mut func: impl FnMut(&str) -> bool) -> bool {
        debug_assert!(validate_dir_path(path), "invalid directory path");

        let tree = self.tree.lock();
        let Some(dir) = tree.find_dir(path) else {
            return false;
        };

        for &child in &tree.dirs[dir].dirs {
            if tree.dirs[child].deleted {
                continue;
            }
            if func(&tree.dirs[child].name) {
                return true;
            }
        }
        false
    }

    /// Enumerate file names directly inside `path`, filtered by pattern.
    pub fn enum_local_files(
        &self,
        path: &str,
        pattern: &str,
        mut func: impl FnMut(&str) -> bool,
    ) -> bool {
        debug_assert!(validate_dir_path(path), "invalid directory path");

        let tree = self.tree.lock();
        let Some(dir) = tree.find_dir(path) else {
            return false;
        };

        for &file in &tree.dirs[dir].files {
            if tree.files[file].deleted {
                continue;
            }
            if !match_pattern(&tree.files[file].name, pattern) {
                continue;
            }
            if func(&tree.files[file].name) {
                return true;
            }
        }
        false
    }

    /// Enumerate filesystem roots; the memory filesystem has exactly one.
    pub fn enum_roots(&self, mut func: impl FnMut(&str) -> bool) -> bool {
        func("/")
    }

    //--

    pub fn collect_files(&self, path: &str, pattern: &str, recursive: bool) -> Vec<String> {
        let mut paths = Vec::new();
        self.enum_files(
            path,
            pattern,
            |full_path, _| {
                paths.push(full_path.to_string());
                false
            },
            recursive,
        );
        paths
    }

    pub fn collect_sub_dirs(&self, path: &str) -> Vec<String> {
        let mut names = Vec::new();
        self.enum_sub_dirs(path, |name| {
            names.push(name.to_string());
            false
        });
        names
    }

    pub fn collect_local_files(&self, path: &str, pattern: &str) -> Vec<String> {
        let mut names = Vec::new();
        self.enum_local_files(path, pattern, |name| {
            names.push(name.to_string());
            false
        });
        names
    }

    pub fn collect_roots(&self) -> Vec<String> {
        let mut roots = Vec::new();
        self.enum_roots(|name| {
            roots.push(name.to_string());
            false
        });
        roots
    }

    //--

    /// Create a watcher observing the whole filesystem. The filesystem holds
    /// it weakly, so dropping the watcher detaches it.
    pub fn create_watcher(&self, path: &str) -> Arc<DirectoryWatcher> {
        let watcher = DirectoryWatcher::new(path.to_string());
        self.watchers.lock().push(Arc::downgrade(&watcher));
        watcher
    }
}

// ============================================================================
// Writer
// ============================================================================

/// Memory-backed file writer; flushes its content back into the filesystem
/// when dropped.
pub struct MemoryFileWriter {
    fs: Arc<MemoryFileSystem>,
    path: String,
    data: Vec<u8>,
}

impl MemoryFileWriter {
    /// Bytes accumulated so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl std::io::Write for MemoryFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.data.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Drop for MemoryFileWriter {
    fn drop(&mut self) {
        let content = Bytes::copy_from_slice(&self.data);
        self.fs.update_content_external(&self.path, content, Utc::now());
    }
}

// ============================================================================
// Tests
// ============================================================================
