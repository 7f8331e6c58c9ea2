use criterion::{Criterion, criterion_group, criterion_main};
use rag_pipeline::llm::TemplateCatalog;
use std::hint::black_box;

fn assemble(catalog: &TemplateCatalog, documents: &[String], query: &str) -> String {
    let blocks: Vec<String> = documents
        .iter()
        .enumerate()
        .map(|(idx, text)| {
            catalog
                .get(
                    "rag",
                    "document_prompt",
                    &[("doc_num", &(idx + 1).to_string()), ("chunk_text", text)],
                )
                .expect("template exists")
        })
        .collect();

    let footer = catalog
        .get("rag", "footer_prompt", &[("query", query)])
        .expect("template exists");

    format!("{}\n{}", blocks.join("\n"), footer)
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let catalog = TemplateCatalog::new();
    let documents: Vec<String> = (0..50)
        .map(|i| format!("document body {} ", i).repeat(30))
        .collect();
    let query = "how does the prompt assembly behave under load?";

    c.bench_function("prompt_assembly", |b| {
        b.iter(|| assemble(black_box(&catalog), black_box(&documents), black_box(query)))
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
