// Memory filesystem scenarios: the mock depot behavior other subsystems
// lean on in tests, exercised through the public reader interfaces.

use ember_core::file::{heap_pool, FileRange, MemoryFileSystem};
use ember_core::task::TaskBuilder;
use std::sync::Arc;

const KOTA: &str = "Ala ma kota";

#[test]
fn copy_leaves_source_intact_with_equal_content() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/a/x", "hello");
    fs.create_path("/b/");

    assert!(fs.copy_file("/a/x", "/b/y"));

    assert_eq!(fs.load_text("/a/x").unwrap(), "hello");
    assert_eq!(fs.load_text("/b/y").unwrap(), "hello");

    // both files readable through the reader interface
    let src = fs.open_for_reading("/a/x").unwrap();
    let dest = fs.open_for_reading("/b/y").unwrap();
    let src_content = src.load_to_buffer(heap_pool(), src.full_range()).unwrap();
    let dest_content = dest.load_to_buffer(heap_pool(), dest.full_range()).unwrap();
    assert_eq!(src_content, dest_content);
}

#[test]
fn move_removes_source_and_preserves_bytes_and_timestamp() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/a/x", "hello");
    fs.create_path("/b/");

    let (timestamp, size) = fs.file_info("/a/x").unwrap();

    assert!(fs.move_file("/a/x", "/b/z"));

    assert!(!fs.has_file("/a/x"));
    assert!(fs.open_for_reading("/a/x").is_none());

    let (moved_timestamp, moved_size) = fs.file_info("/b/z").unwrap();
    assert_eq!(moved_timestamp, timestamp);
    assert_eq!(moved_size, size);
    assert_eq!(fs.load_text("/b/z").unwrap(), "hello");
}

#[test]
fn stored_file_reads_async_through_task_yield() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/test.txt", KOTA);

    let reader = fs.open_for_reading("/test.txt").unwrap();
    assert_eq!(reader.size(), 11);

    let result = Arc::new(parking_lot::Mutex::new((0u64, Vec::new())));
    let out = result.clone();
    let file = reader.clone();
    let done = TaskBuilder::new("FsRead").run(move |ctx| {
        let mut buffer = vec![0u8; 11];
        // Safety: buffer holds 11 bytes and outlives the yield-wait
        let bytes_read = unsafe {
            file.read_async_yield(ctx, FileRange::new(0, 11), buffer.as_mut_ptr())
                .expect("memory read can't fail")
        };
        *out.lock() = (bytes_read, buffer);
    });
    done.wait_spin_infinite();

    let (bytes_read, buffer) = &*result.lock();
    assert_eq!(*bytes_read, 11);
    assert_eq!(&buffer[..], KOTA.as_bytes());
}

#[test]
fn stored_file_full_reader_surface() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/test.txt", KOTA);

    let reader = fs.open_for_reading("/test.txt").unwrap();

    // view
    let mut view = reader.clone().create_view(reader.full_range()).unwrap();
    assert_eq!(view.size(), 11);
    let mut buffer = [0u8; 64];
    assert_eq!(view.read_sync(&mut buffer), 11);
    assert_eq!(&buffer[..11], KOTA.as_bytes());

    // mapping
    let mapping = reader.clone().create_mapping(reader.full_range()).unwrap();
    assert_eq!(mapping.size(), 11);
    assert_eq!(mapping.data(), KOTA.as_bytes());

    // load
    let loaded = reader
        .load_to_buffer(heap_pool(), reader.full_range())
        .unwrap();
    assert_eq!(&loaded[..], KOTA.as_bytes());
}

#[test]
fn deleted_file_keeps_old_reader_readable() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/test.txt", KOTA);

    let reader = fs.open_for_reading("/test.txt").unwrap();
    assert!(fs.delete_file("/test.txt"));
    assert!(fs.open_for_reading("/test.txt").is_none());

    let loaded = reader
        .load_to_buffer(heap_pool(), reader.full_range())
        .unwrap();
    assert_eq!(&loaded[..], KOTA.as_bytes());
}

#[test]
fn overwrite_does_not_change_prior_readers() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/test.txt", "first");

    let before = fs.open_for_reading("/test.txt").unwrap();
    fs.save_file_from_buffer("/test.txt", b"second", None);
    let after = fs.open_for_reading("/test.txt").unwrap();

    let old = before
        .load_to_buffer(heap_pool(), before.full_range())
        .unwrap();
    let new = after.load_to_buffer(heap_pool(), after.full_range()).unwrap();
    assert_eq!(&old[..], b"first");
    assert_eq!(&new[..], b"second");
}

#[test]
fn deep_tree_enumeration() {
    let fs = MemoryFileSystem::new();
    fs.store_text("/assets/models/chair.mdl", "m");
    fs.store_text("/assets/models/table.mdl", "m");
    fs.store_text("/assets/textures/wood.tex", "t");
    fs.store_text("/code/main.rs", "c");

    assert_eq!(fs.collect_sub_dirs("/"), vec!["assets", "code"]);
    assert_eq!(fs.collect_sub_dirs("/assets/"), vec!["models", "textures"]);

    let models = fs.collect_files("/assets/", "*.mdl", true);
    assert_eq!(
        models,
        vec!["/assets/models/chair.mdl", "/assets/models/table.mdl"]
    );

    let everything = fs.collect_files("/", "*.*", true);
    assert_eq!(everything.len(), 4);
}
