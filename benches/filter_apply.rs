use criterion::{BatchSize, Criterion, criterion_group, criterion_main};
use sheet_facets::{
    config::EngineConfig,
    dataset::RawTable,
    filter::{self, FilterSpec, Selection},
    normalize::Normalizer,
    schema::ColumnKind,
    summary,
};

fn generate_termos(rows: usize) -> RawTable {
    let cities = ["Natal", "Mossoró", "Caicó", "Parnamirim", "Açu"];
    let statuses = ["Recebido", "Pendente", "Em análise", ""];
    let headers = vec![
        "Unnamed: 0".to_string(),
        "MUNICÍPIOS".to_string(),
        "STATUS GERAL RECEBIMENTO".to_string(),
        "index".to_string(),
        "DATA DA INSTALAÇÃO".to_string(),
    ];
    let data = (0..rows)
        .map(|i| {
            vec![
                i.to_string(),
                cities[i % cities.len()].to_string(),
                statuses[i % statuses.len()].to_string(),
                if i % 17 == 0 { "N/A".to_string() } else { (i % 500).to_string() },
                format!("2024-{:02}-{:02}", (i % 12) + 1, (i % 28) + 1),
            ]
        })
        .collect();
    RawTable::new(headers, data)
}

fn bench_filter_apply(c: &mut Criterion) {
    let raw = generate_termos(50_000);
    let normalizer = Normalizer::new(&EngineConfig::default()).expect("normalizer");
    let dataset = normalizer.normalize(&raw).expect("normalize").dataset;
    let filters = vec![
        FilterSpec::new(
            "MUNICÍPIOS",
            ColumnKind::Categorical,
            Selection::values(["Natal", "Caicó"]),
        ),
        FilterSpec::new(
            "index",
            ColumnKind::Numeric,
            Selection::Range {
                min: Some(100.0),
                max: Some(400.0),
                include_unknown: false,
            },
        ),
    ];

    let mut group = c.benchmark_group("facets");

    group.bench_function("normalize_50k", |b| {
        b.iter_batched(
            || raw.clone(),
            |raw| normalizer.normalize(&raw).expect("normalize"),
            BatchSize::LargeInput,
        );
    });

    group.bench_function("apply_two_filters", |b| {
        b.iter(|| filter::apply(&dataset, &filters).expect("apply"));
    });

    group.bench_function("value_counts_status", |b| {
        b.iter(|| {
            summary::value_counts(&dataset, "STATUS GERAL RECEBIMENTO", "unknown").expect("counts")
        });
    });

    group.finish();
}

criterion_group!(benches, bench_filter_apply);
criterion_main!(benches);
