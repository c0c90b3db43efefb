//! Performance benchmarks for shelfsync-engine

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use shelfsync_engine::merge::{merge_books, merge_notes};
use shelfsync_engine::reconcile::resolve;
use shelfsync_engine::{
    Book, BookConfig, BookFormat, BookNote, NoteKind, Progress, RawSyncPayload, Transform,
    ViewSettings,
};

fn library(n: usize, at: u64) -> Vec<Book> {
    (0..n)
        .map(|i| {
            let mut book = Book::new(
                format!("hash_{i:06}"),
                BookFormat::Epub,
                format!("Title {i}"),
                "Author",
                at,
            );
            book.tags = vec!["fiction".into(), "to-read".into()];
            book.uploaded_at = Some(at);
            book
        })
        .collect()
}

fn notes(n: usize, at: u64) -> Vec<BookNote> {
    (0..n)
        .map(|i| {
            BookNote::new(
                "book",
                format!("note_{i}"),
                NoteKind::Annotation,
                format!("epubcfi(/6/{}!/4/2/1:{})", 2 + (i % 40) * 2, i % 300),
                at,
            )
        })
        .collect()
}

fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("transform");

    let book = &library(1, 1000)[0];
    group.bench_function("book_to_wire", |b| {
        b.iter(|| black_box(book).to_wire("user").unwrap())
    });

    let row = book.to_wire("user").unwrap();
    group.bench_function("book_from_wire", |b| {
        b.iter(|| Book::from_wire(black_box(row.clone())))
    });

    let mut config = BookConfig::new("book", 1000);
    config.set_position("epubcfi(/6/4!/4/2/1:10)", Progress::new(10, 300), 1000);
    config.view_settings = Some(ViewSettings::default());
    let config_row = config.to_wire("user").unwrap();
    group.bench_function("config_from_wire", |b| {
        b.iter(|| BookConfig::from_wire(black_box(config_row.clone())))
    });

    group.finish();
}

fn bench_decode_payload(c: &mut Criterion) {
    let mut group = c.benchmark_group("decode_payload");

    for size in [10, 100, 1000].iter() {
        let rows: Vec<_> = library(*size, 1000)
            .iter()
            .map(|b| serde_json::to_value(b.to_wire("user").unwrap()).unwrap())
            .collect();
        group.bench_with_input(BenchmarkId::new("books", size), &rows, |b, rows| {
            b.iter(|| {
                RawSyncPayload {
                    books: rows.clone(),
                    ..RawSyncPayload::default()
                }
                .decode()
            })
        });
    }

    group.finish();
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [100, 1000, 5000].iter() {
        let local = library(*size, 1000);
        let remote = library(*size, 2000);
        group.bench_with_input(
            BenchmarkId::new("books", size),
            &(local, remote),
            |b, (local, remote)| b.iter(|| merge_books(black_box(local), remote.clone())),
        );

        let local = notes(*size, 1000);
        let remote = notes(*size / 2, 2000);
        group.bench_with_input(
            BenchmarkId::new("notes", size),
            &(local, remote),
            |b, (local, remote)| b.iter(|| merge_notes(black_box(local), remote.clone(), "book")),
        );
    }

    group.finish();
}

fn bench_reconcile(c: &mut Criterion) {
    let stored = library(1, 1000).remove(0);
    let incoming = library(1, 2000).remove(0);

    c.bench_function("resolve_client_wins", |b| {
        b.iter(|| resolve(black_box(incoming.clone()), Some(stored.clone()), 3000))
    });
}

criterion_group!(
    benches,
    bench_transform,
    bench_decode_payload,
    bench_merge,
    bench_reconcile
);
criterion_main!(benches);
