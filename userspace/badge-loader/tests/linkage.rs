//! CONTEXT: Integration tests for the load/link state machine
//! OWNERS: @runtime
//! STATUS: Functional
//! API_STABILITY: Stable
//! TEST_COVERAGE: 11 integration tests
//!
//! TEST_SCOPE:
//!   - Strict load-then-link sequencing
//!   - Link idempotence and abort-on-first-failure
//!   - Failure atomicity of segment placement
//!   - Whole-image placement preserving segment layout
//!   - Export registration and collision policies
//!
//! DEPENDENCIES:
//!   - badge_loader::Linkage: orchestrator under test
//!   - FakeParser / FakeObject: recording stand-ins for the object-file collaborator

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use badge_arena::{Arena, HeapAllocator, Pid, Prot, SharedArena};
use badge_loader::{
    CollisionPolicy, Error, Export, Linkage, LoadedImage, ObjectFile, ObjectParser, Segment, SymbolTable,
};

#[derive(Clone, Default)]
struct FakeObject {
    segments: Vec<Segment>,
    needed: Vec<String>,
    exports: Vec<Export>,
    entry: Option<u64>,
    fail_relocate: bool,
    relocations: Arc<AtomicUsize>,
}

impl ObjectFile for FakeObject {
    fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn needed(&self) -> &[String] {
        &self.needed
    }

    fn exports(&self) -> &[Export] {
        &self.exports
    }

    fn entry(&self) -> Option<u64> {
        self.entry
    }

    fn relocate(&self, _image: &LoadedImage, _symbols: &SymbolTable, _arena: &mut Arena) -> Result<(), Error> {
        self.relocations.fetch_add(1, Ordering::SeqCst);
        if self.fail_relocate {
            Err(Error::UnresolvedSymbol("missing".into()))
        } else {
            Ok(())
        }
    }
}

#[derive(Default)]
struct FakeParser {
    objects: HashMap<String, FakeObject>,
}

impl ObjectParser for FakeParser {
    fn parse(&self, _name: &str, bytes: &[u8]) -> Result<Box<dyn ObjectFile>, Error> {
        let key = std::str::from_utf8(bytes).map_err(|_| Error::InvalidObject("not a fixture key"))?;
        self.objects
            .get(key)
            .cloned()
            .map(|obj| Box::new(obj) as Box<dyn ObjectFile>)
            .ok_or(Error::InvalidObject("unknown fixture"))
    }
}

fn text(vaddr: u64, len: u64) -> Segment {
    Segment { vaddr, mem_size: len, align: 16, data: vec![0x13; len as usize / 2], prot: Prot::R | Prot::X }
}

fn export(name: &str, value: u64) -> Export {
    Export { name: name.into(), value, absolute: false }
}

fn arena_with(allocator: HeapAllocator) -> SharedArena {
    Arena::new(Pid::new(3), Box::new(allocator)).into_shared()
}

fn new_linkage(parser: FakeParser) -> Linkage {
    Linkage::new(arena_with(HeapAllocator::new()), Arc::new(parser))
}

fn load_lib(linkage: &mut Linkage, key: &str) -> Result<(), Error> {
    linkage.load_library(key, &mut Cursor::new(key.as_bytes().to_vec()))
}

fn load_exe(linkage: &mut Linkage, key: &str) -> Result<(), Error> {
    linkage.load_executable(key, &mut Cursor::new(key.as_bytes().to_vec()))
}

fn simple_parser() -> (FakeParser, Arc<AtomicUsize>) {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut parser = FakeParser::default();
    parser.objects.insert(
        "app".into(),
        FakeObject {
            segments: vec![text(0x1000, 0x40)],
            exports: vec![export("main", 0x1010)],
            entry: Some(0x1010),
            relocations: counter.clone(),
            ..FakeObject::default()
        },
    );
    parser.objects.insert(
        "libfoo.so".into(),
        FakeObject {
            segments: vec![text(0x0, 0x80)],
            exports: vec![export("foo", 0x20), export("main", 0x40)],
            relocations: counter.clone(),
            ..FakeObject::default()
        },
    );
    (parser, counter)
}

#[test]
fn executable_entry_is_translated_into_the_arena() {
    let (parser, _) = simple_parser();
    let mut linkage = new_linkage(parser);
    load_exe(&mut linkage, "app").expect("load app");

    let module = &linkage.modules()[0];
    let base = module.image().segments()[0].base;
    assert_eq!(linkage.entry(), Some(base + 0x10));
    assert_eq!(linkage.symbols().get("main"), Some(base + 0x10));
    assert_eq!(linkage.arena().lock().read(base, 2).unwrap(), vec![0x13, 0x13]);
}

#[test]
fn loads_after_any_link_attempt_fail() {
    let (parser, _) = simple_parser();
    let mut linkage = new_linkage(parser);
    load_exe(&mut linkage, "app").unwrap();
    linkage.link().expect("link");
    assert!(matches!(load_lib(&mut linkage, "libfoo.so"), Err(Error::LinkAttempted)));

    let mut parser = FakeParser::default();
    parser.objects.insert("bad".into(), FakeObject { fail_relocate: true, ..FakeObject::default() });
    let mut failed = new_linkage(parser);
    load_lib(&mut failed, "bad").unwrap();
    assert!(failed.link().is_err());
    assert!(matches!(load_lib(&mut failed, "bad"), Err(Error::LinkAttempted)));
}

#[test]
fn second_executable_is_rejected() {
    let (parser, _) = simple_parser();
    let mut linkage = new_linkage(parser);
    load_exe(&mut linkage, "app").unwrap();
    assert!(matches!(load_exe(&mut linkage, "app"), Err(Error::ExecutableLoaded)));
    assert_eq!(linkage.modules().len(), 1);
}

#[test]
fn link_is_idempotent() {
    let (parser, counter) = simple_parser();
    let mut linkage = new_linkage(parser);
    load_exe(&mut linkage, "app").unwrap();
    load_lib(&mut linkage, "libfoo.so").unwrap();

    assert!(linkage.link().is_ok());
    assert!(linkage.link().is_ok());
    assert_eq!(counter.load(Ordering::SeqCst), 2, "one relocation pass per module, first call only");
    assert!(linkage.is_ready_as_program());
    assert!(!linkage.is_ready_as_library());
}

#[test]
fn first_relocation_failure_aborts_the_link() {
    let counter = Arc::new(AtomicUsize::new(0));
    let mut parser = FakeParser::default();
    parser.objects.insert(
        "broken".into(),
        FakeObject { fail_relocate: true, relocations: counter.clone(), ..FakeObject::default() },
    );
    parser.objects.insert("fine".into(), FakeObject { relocations: counter.clone(), ..FakeObject::default() });
    let mut linkage = new_linkage(parser);
    load_lib(&mut linkage, "broken").unwrap();
    load_lib(&mut linkage, "fine").unwrap();

    assert!(matches!(linkage.link(), Err(Error::UnresolvedSymbol(_))));
    assert!(matches!(linkage.link(), Err(Error::LinkFailed)));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(!linkage.is_ready_as_library());
    assert!(!linkage.is_ready_as_program());
}

#[test]
fn failed_segment_placement_registers_nothing() {
    let mut parser = FakeParser::default();
    parser.objects.insert(
        "huge".into(),
        FakeObject {
            segments: vec![text(0x0, 0x40), text(0x1000, 0x10_000)],
            exports: vec![export("foo", 0x10)],
            ..FakeObject::default()
        },
    );
    let arena = arena_with(HeapAllocator::with_limit(0x1000));
    let mut linkage = Linkage::new(arena.clone(), Arc::new(parser));

    assert!(matches!(load_lib(&mut linkage, "huge"), Err(Error::Segment(_))));
    assert!(linkage.modules().is_empty());
    assert!(linkage.symbols().is_empty());
    assert!(arena.lock().actual().is_empty());
    assert!(arena.lock().mapped().is_empty());
}

#[test]
fn collisions_follow_the_configured_policy() {
    let (parser, _) = simple_parser();
    let mut last = new_linkage(parser);
    load_exe(&mut last, "app").unwrap();
    load_lib(&mut last, "libfoo.so").unwrap();
    let lib_base = last.modules()[1].image().segments()[0].base;
    assert_eq!(last.symbols().get("main"), Some(lib_base + 0x40));

    let (parser, _) = simple_parser();
    let mut first = new_linkage(parser).with_collision_policy(CollisionPolicy::FirstWins);
    load_exe(&mut first, "app").unwrap();
    load_lib(&mut first, "libfoo.so").unwrap();
    let app_base = first.modules()[0].image().segments()[0].base;
    assert_eq!(first.symbols().get("main"), Some(app_base + 0x10));
}

#[test]
fn garbage_collect_waits_for_the_link_attempt() {
    let (parser, _) = simple_parser();
    let mut linkage = new_linkage(parser);
    load_exe(&mut linkage, "app").unwrap();
    linkage.garbage_collect();
    assert!(linkage.modules()[0].has_metadata());
    linkage.link().unwrap();
    linkage.garbage_collect();
    assert!(!linkage.modules()[0].has_metadata());
    assert!(linkage.link().is_ok(), "cached result survives collection");
}

#[test]
fn library_only_linkage_is_ready_as_library() {
    let (parser, _) = simple_parser();
    let mut linkage = new_linkage(parser);
    load_lib(&mut linkage, "libfoo.so").unwrap();
    assert!(!linkage.is_ready_as_library());
    linkage.link().unwrap();
    assert!(linkage.is_ready_as_library());
    assert_eq!(linkage.filenames().collect::<Vec<_>>(), vec!["libfoo.so"]);
    assert_eq!(linkage.pid(), Pid::new(3));
}

fn segment(vaddr: u64, len: u64, align: u64, fill: u8, prot: Prot) -> Segment {
    Segment { vaddr, mem_size: len, align, data: vec![fill; len as usize / 2], prot }
}

#[test]
fn segments_keep_their_distance() {
    let mut parser = FakeParser::default();
    parser.objects.insert(
        "split".into(),
        FakeObject {
            segments: vec![
                segment(0x0, 0x800, 0x1000, 0x13, Prot::R | Prot::X),
                segment(0x1000, 0x100, 0x1000, 0xaa, Prot::R | Prot::W),
            ],
            entry: Some(0x10),
            ..FakeObject::default()
        },
    );
    let mut linkage = new_linkage(parser);
    load_exe(&mut linkage, "split").unwrap();

    let image = linkage.modules()[0].image().clone();
    let text = image.translate(0x0).unwrap();
    let data = image.translate(0x1000).unwrap();
    assert_eq!(data - text, 0x1000);
    assert_eq!(text % 0x1000, 0);
    assert_eq!(image.base(), Some(text));
    assert_eq!(image.offset(), text);
    assert_eq!(linkage.entry(), Some(text + 0x10));

    let arena = linkage.arena().lock();
    assert_eq!(arena.mapped().len(), 1, "one mapping per object");
    assert_eq!(arena.read(text, 1).unwrap(), vec![0x13]);
    assert_eq!(arena.read(data, 1).unwrap(), vec![0xaa]);
    assert_eq!(arena.read(text + 0x400, 1).unwrap(), vec![0], "gap is zero filled");
}

#[test]
fn unaligned_first_segment_stays_congruent() {
    let mut parser = FakeParser::default();
    parser.objects.insert(
        "offset".into(),
        FakeObject {
            segments: vec![
                segment(0x1100, 0x40, 0x1000, 1, Prot::R | Prot::X),
                segment(0x3208, 0x40, 0x8, 2, Prot::R | Prot::W),
            ],
            ..FakeObject::default()
        },
    );
    let mut linkage = new_linkage(parser);
    load_lib(&mut linkage, "offset").unwrap();

    let image = linkage.modules()[0].image().clone();
    let first = image.translate(0x1100).unwrap();
    let second = image.translate(0x3208).unwrap();
    assert_eq!(first % 0x1000, 0x100);
    assert_eq!(second - first, 0x2108);
    assert_eq!(image.offset(), first - 0x1100);

    let base = image.base().unwrap();
    assert_eq!(first - base, 0x100);
    let range = linkage.arena().lock().range_of(base).unwrap();
    assert_eq!(range.base, base);
    assert!(range.length >= 0x3248 - 0x1000);
}
