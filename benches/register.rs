use std::time::Duration;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use percolator::{
    Monitor, MonitorConfig, MonitorQuery, SchemaQueryParser, TermFilteredPresearcher,
};
use tantivy::schema::{Field, Schema, TEXT};
use tantivy::TantivyDocument;

static QUERIES: [&str; 6] = [
    "body:barack OR body:biden",
    "body:barack OR body:clinton",
    "body:barack OR body:roosevelt",
    "body:barack OR body:clinton OR body:biden",
    "body:barack OR body:bloomberg OR body:biden",
    "body:barack OR body:trump",
];

static DOCUMENT: &str = "Quite so! You have not observed. And yet you have seen. That is just \
    my point. Now, I know that there are seventeen steps, because I have \
    both seen and observed. By-the-way, since you are interested in these \
    little problems, and since you are good enough to chronicle one or \
    two of my trifling experiences, you may be interested in this. He \
    threw over a sheet of thick, pink-tinted note-paper which had been \
    lying open upon the table. Donald Trump.";

fn document_schema() -> (Schema, Field) {
    let mut schema_builder = Schema::builder();
    let body = schema_builder.add_text_field("body", TEXT);
    (schema_builder.build(), body)
}

fn new_monitor() -> Monitor<TermFilteredPresearcher> {
    let (schema, _) = document_schema();
    Monitor::new(
        schema.clone(),
        Box::new(SchemaQueryParser::for_schema(&schema).unwrap()),
        TermFilteredPresearcher::default(),
        MonitorConfig {
            purge_frequency: Duration::ZERO,
            ..MonitorConfig::default()
        },
    )
    .unwrap()
}

fn register_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("register");
    let monitor = new_monitor();
    let mut next_id = 0u64;

    group.bench_with_input(BenchmarkId::new("single", ""), &monitor, |b, monitor| {
        b.iter(|| {
            let query = MonitorQuery::new(next_id.to_string(), QUERIES[0]);
            next_id += 1;
            monitor.register(&query).unwrap()
        })
    });
}

fn match_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("match_document");
    let (_, body) = document_schema();
    let monitor = new_monitor();
    for (index, query) in QUERIES.iter().enumerate() {
        monitor
            .register(&MonitorQuery::new(index.to_string(), *query))
            .unwrap();
    }

    group.bench_with_input(BenchmarkId::new("single", ""), &monitor, |b, monitor| {
        b.iter(|| {
            let mut document = TantivyDocument::default();
            document.add_text(body, DOCUMENT);
            monitor.match_document(document).unwrap()
        })
    });
}

criterion_group!(benches, register_benchmark, match_benchmark);
criterion_main!(benches);
