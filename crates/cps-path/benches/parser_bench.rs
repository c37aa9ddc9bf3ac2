//! Benchmark: CPS path parsing
//!
//! Measures parse cost for the path shapes the inventory issues most often:
//! single list element lookups, descendant property queries with an ancestor
//! axis, and long absolute paths with keyed intermediate steps.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

const LIST_ELEMENT: &str = "/dmi-registry/cm-handles[@id='ch-1']";
const PROPERTY_QUERY: &str =
    "//additional-properties[@name=\"vendor\" and @value=\"acme\"]/ancestor::cm-handles";
const TEXT_QUERY: &str = "/bookstore/categories[@code='01']/books/title[text()='Matilda']";

fn deep_path(depth: usize) -> String {
    let mut path = String::new();
    for i in 0..depth {
        path.push_str(&format!("/level-{i}[@key='value-{i}']"));
    }
    path
}

fn bench_common_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_common");
    for (name, path) in [
        ("list_element", LIST_ELEMENT),
        ("property_query", PROPERTY_QUERY),
        ("text_query", TEXT_QUERY),
    ] {
        group.bench_function(name, |b| b.iter(|| cps_path::parse(black_box(path))));
    }
    group.finish();
}

fn bench_deep_paths(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_depth");
    for depth in [4usize, 16, 64] {
        let path = deep_path(depth);
        group.bench_with_input(BenchmarkId::from_parameter(depth), &path, |b, path| {
            b.iter(|| cps_path::parse(black_box(path)))
        });
    }
    group.finish();
}

fn bench_split_segments(c: &mut Criterion) {
    let path = deep_path(64);
    c.bench_function("split_xpath_segments_64", |b| {
        b.iter(|| cps_path::xpath::split_xpath_segments(black_box(&path)).len())
    });
}

criterion_group!(benches, bench_common_paths, bench_deep_paths, bench_split_segments);
criterion_main!(benches);
