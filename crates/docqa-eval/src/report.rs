use std::fmt::Write;

use crate::evaluator::{CaseRecord, EvalResult};
use crate::metrics::Summary;

fn case_line(out: &mut String, r: &CaseRecord) {
    let status = if r.passed { "OK" } else { "FAIL" };
    let notes = if r.notes.is_empty() { "-".to_string() } else { r.notes.join(", ") };
    let hit = r.hit.map_or("-", |h| if h { "yes" } else { "no" });
    let _ = writeln!(
        out,
        "[{}] {status} | refused={} sources={} hit={hit} | {notes}",
        r.id,
        r.refused,
        r.sources.len()
    );
}

fn summary_line(out: &mut String, label: &str, s: &Summary, precision: usize) {
    if s.count == 0 {
        let _ = writeln!(out, "{label:<12} n/a");
        return;
    }
    let _ = writeln!(
        out,
        "{label:<12} mean={:.p$} p50={:.p$} p90={:.p$} p99={:.p$}",
        s.mean,
        s.p50,
        s.p90,
        s.p99,
        p = precision
    );
}

/// Human-readable report. With `failures_only`, passing cases are omitted.
pub fn render(result: &EvalResult, failures_only: bool) -> String {
    let q = &result.quality;
    let mut out = String::new();
    let _ = writeln!(out, "EVAL RUN (index {}, k={})", result.index_version, result.top_k);
    let _ = writeln!(out, "cases: {}\n", q.cases);

    for r in result.cases.iter().filter(|r| !failures_only || !r.passed) {
        case_line(&mut out, r);
    }

    let _ = writeln!(out, "\nSUMMARY");
    let _ = writeln!(out, "passed:          {}/{}", q.passed, q.cases);
    let _ = writeln!(out, "errors:          {}", q.errors);
    let _ = writeln!(out, "hit@k:           {:.2}", q.hit_at_k);
    let _ = writeln!(out, "grounded_rate:   {:.2}", q.grounded_rate);
    let _ = writeln!(out, "refusal_quality: {:.2}", q.refusal_quality);
    let _ = writeln!(out, "keyword_rate:    {:.2}", q.keyword_rate);

    let _ = writeln!(out, "\nLATENCY (ms)");
    summary_line(&mut out, "embed", &result.latency.embed_ms, 1);
    summary_line(&mut out, "search", &result.latency.search_ms, 2);
    summary_line(&mut out, "prompt", &result.latency.prompt_ms, 2);
    summary_line(&mut out, "generate", &result.latency.generate_ms, 1);
    summary_line(&mut out, "total", &result.latency.total_ms, 1);

    let _ = writeln!(out, "\nCOST (USD)");
    summary_line(&mut out, "per case", &result.cost_usd, 6);
    let _ = writeln!(out, "{:<12} {:.6}", "total", result.total_cost_usd);
    out
}
