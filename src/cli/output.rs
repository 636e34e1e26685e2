use std::fmt::{self, Write as FmtWrite};

use serde::Serialize;

use crate::models::{
    CostEstimate, KnowledgeBase, KnowledgePoint, OutputFormat, PointPage, SearchResults,
    SyncResult,
};
use crate::utils::{single_line, truncate_chars};

const PREVIEW_CHARS: usize = 200;
const ROW_PREVIEW_CHARS: usize = 60;

pub trait Formatter {
    fn format_search_results(&self, results: &SearchResults) -> String;
    fn format_status(&self, status: &StatusInfo) -> String;
    fn format_bases(&self, bases: &[KnowledgeBase]) -> String;
    fn format_base(&self, base: &KnowledgeBase) -> String;
    fn format_points(&self, page: &PointPage) -> String;
    fn format_point(&self, point: &KnowledgePoint) -> String;
    fn format_sync_result(&self, result: &SyncResult) -> String;
    fn format_estimate(&self, estimate: &EstimateReport) -> String;
    fn format_message(&self, message: &str) -> String;
    fn format_error(&self, error: &str) -> String;
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusInfo {
    pub embedding_model: String,
    pub embedding_url: String,
    pub embedding_configured: bool,
    pub embedding_probe: Option<String>,
    pub vector_store_url: String,
    pub vector_store_connected: bool,
    pub collections: usize,
    pub store_driver: String,
    pub store_connected: bool,
    pub knowledge_bases: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct EstimateReport {
    #[serde(flatten)]
    pub estimate: CostEstimate,
    pub chunks: usize,
    pub chunk_max_tokens: usize,
    pub chunk_overlap: usize,
}

/// Run a writer closure against a fresh buffer. Writing to a `String`
/// cannot fail, so the result is dropped.
fn render(write: impl FnOnce(&mut String) -> fmt::Result) -> String {
    let mut output = String::new();
    let _ = write(&mut output);
    output
}

fn mark(ok: bool) -> &'static str {
    if ok { "[OK]" } else { "[UNAVAILABLE]" }
}

fn synced_at(base: &KnowledgeBase) -> String {
    base.last_synced_at
        .map_or_else(|| "never".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

pub struct TextFormatter;

impl Formatter for TextFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("No results found for: {}\n", results.query);
        }

        render(|output| {
            writeln!(
                output,
                "Search results for: \"{}\" in {}",
                results.query, results.knowledge_base
            )?;
            writeln!(
                output,
                "Found {} results in {}ms\n",
                results.len(),
                results.duration_ms
            )?;

            for (i, result) in results.results.iter().enumerate() {
                writeln!(output, "{}. [Score: {:.3}] {}", i + 1, result.score, result.id)?;
                writeln!(output, "   ---")?;
                let content = result.page_content().unwrap_or_default();
                for line in truncate_chars(content, PREVIEW_CHARS).lines() {
                    writeln!(output, "   {line}")?;
                }
                writeln!(output)?;
            }
            Ok(())
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        render(|output| {
            writeln!(output, "Status")?;
            writeln!(output, "------")?;

            let key = if status.embedding_configured {
                "[CONFIGURED]"
            } else {
                "[MISSING API KEY]"
            };
            writeln!(output, "Embedding:     {} {}", status.embedding_model, key)?;
            writeln!(output, "  URL:         {}", status.embedding_url)?;
            if let Some(ref probe) = status.embedding_probe {
                writeln!(output, "  Probe:       {probe}")?;
            }
            writeln!(output)?;

            writeln!(
                output,
                "Vector Store:  qdrant {}",
                mark(status.vector_store_connected)
            )?;
            writeln!(output, "  URL:         {}", status.vector_store_url)?;
            if status.vector_store_connected {
                writeln!(output, "  Collections: {}", status.collections)?;
            }
            writeln!(output)?;

            writeln!(
                output,
                "Store:         {} {}",
                status.store_driver,
                mark(status.store_connected)
            )?;
            if status.store_connected {
                writeln!(output, "  Bases:       {}", status.knowledge_bases)?;
            }
            Ok(())
        })
    }

    fn format_bases(&self, bases: &[KnowledgeBase]) -> String {
        if bases.is_empty() {
            return "No knowledge bases.\n".to_string();
        }

        render(|output| {
            writeln!(
                output,
                "{:<36}  {:<24}  {:>7}  {:>7}  STATE",
                "ID", "NAME", "POINTS", "SYNCED"
            )?;
            for base in bases {
                writeln!(
                    output,
                    "{:<36}  {:<24}  {:>7}  {:>7}  {}",
                    base.id,
                    truncate_chars(&base.name, 21),
                    base.total_points,
                    base.synced_points,
                    base.sync_state()
                )?;
            }
            Ok(())
        })
    }

    fn format_base(&self, base: &KnowledgeBase) -> String {
        render(|output| {
            writeln!(output, "{}", base.name)?;
            writeln!(output, "{}", "-".repeat(base.name.chars().count()))?;
            writeln!(output, "ID:           {}", base.id)?;
            if !base.description.is_empty() {
                writeln!(output, "Description:  {}", base.description)?;
            }
            writeln!(output, "Collection:   {}", base.collection_name)?;
            writeln!(
                output,
                "Model:        {} ({} dims)",
                base.embedding_model, base.vector_dimension
            )?;
            writeln!(
                output,
                "Points:       {} total, {} synced, {} pending",
                base.total_points,
                base.synced_points,
                base.pending_points()
            )?;
            writeln!(output, "State:        {}", base.sync_state())?;
            writeln!(output, "Last synced:  {}", synced_at(base))?;
            Ok(())
        })
    }

    fn format_points(&self, page: &PointPage) -> String {
        if page.points.is_empty() {
            return "No points.\n".to_string();
        }

        render(|output| {
            for point in &page.points {
                let state = if point.synced { "synced " } else { "pending" };
                writeln!(
                    output,
                    "{}  {}  {}",
                    point.id,
                    state,
                    truncate_chars(&single_line(&point.content), ROW_PREVIEW_CHARS)
                )?;
            }
            writeln!(
                output,
                "\nPage {} of {} ({} points)",
                page.page,
                page.total_pages.max(1),
                page.total
            )?;
            Ok(())
        })
    }

    fn format_point(&self, point: &KnowledgePoint) -> String {
        render(|output| {
            writeln!(output, "ID:        {}", point.id)?;
            writeln!(output, "Base:      {}", point.knowledge_base_id)?;
            writeln!(output, "Synced:    {}", point.synced)?;
            if let Some(ref vector_id) = point.vector_point_id {
                writeln!(output, "Vector ID: {vector_id}")?;
            }
            writeln!(output, "Updated:   {}", point.updated_at.to_rfc3339())?;
            if !point.metadata.is_empty() {
                writeln!(
                    output,
                    "Metadata:  {}",
                    serde_json::Value::Object(point.metadata.clone())
                )?;
            }
            writeln!(output, "---")?;
            writeln!(output, "{}", point.content)?;
            Ok(())
        })
    }

    fn format_sync_result(&self, result: &SyncResult) -> String {
        render(|output| {
            writeln!(output, "Sync Complete")?;
            writeln!(output, "-------------")?;
            writeln!(output, "Pending:  {}", result.total_pending)?;
            writeln!(output, "Synced:   {}", result.synced_count)?;
            writeln!(output, "Errors:   {}", result.error_count)?;
            writeln!(output, "Batches:  {}", result.batches)?;
            if let Some(cost) = result.cost {
                writeln!(output, "Cost:     ${cost:.6}")?;
            }
            writeln!(output, "Duration: {}ms", result.duration_ms)?;
            for detail in &result.errors {
                writeln!(output, "  - {detail}")?;
            }
            Ok(())
        })
    }

    fn format_estimate(&self, report: &EstimateReport) -> String {
        render(|output| {
            let estimate = &report.estimate;
            writeln!(output, "Model:   {}", estimate.model)?;
            writeln!(output, "Items:   {}", estimate.items)?;
            writeln!(output, "Tokens:  {}", estimate.total_tokens)?;
            writeln!(output, "Cost:    ${:.6}", estimate.estimated_cost)?;
            writeln!(
                output,
                "Chunks:  {} (max {} tokens, overlap {})",
                report.chunks, report.chunk_max_tokens, report.chunk_overlap
            )?;
            if estimate.over_limit > 0 {
                writeln!(
                    output,
                    "Warning: {} item(s) exceed the per-item token limit",
                    estimate.over_limit
                )?;
            }
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("{message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("Error: {error}\n")
    }
}

pub struct JsonFormatter {
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn to_json<T: Serialize + ?Sized>(&self, value: &T) -> String {
        let encoded = if self.pretty {
            serde_json::to_string_pretty(value)
        } else {
            serde_json::to_string(value)
        };
        match encoded {
            Ok(json) => format!("{json}\n"),
            Err(e) => format!("{}\n", serde_json::json!({"error": e.to_string()})),
        }
    }
}

impl Formatter for JsonFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        self.to_json(results)
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        self.to_json(status)
    }

    fn format_bases(&self, bases: &[KnowledgeBase]) -> String {
        self.to_json(bases)
    }

    fn format_base(&self, base: &KnowledgeBase) -> String {
        let mut value = serde_json::json!(base);
        if let Some(object) = value.as_object_mut() {
            object.insert("pending_points".into(), base.pending_points().into());
            object.insert("sync_state".into(), base.sync_state().to_string().into());
        }
        self.to_json(&value)
    }

    fn format_points(&self, page: &PointPage) -> String {
        self.to_json(page)
    }

    fn format_point(&self, point: &KnowledgePoint) -> String {
        self.to_json(point)
    }

    fn format_sync_result(&self, result: &SyncResult) -> String {
        self.to_json(result)
    }

    fn format_estimate(&self, report: &EstimateReport) -> String {
        self.to_json(report)
    }

    fn format_message(&self, message: &str) -> String {
        format!("{}\n", serde_json::json!({"message": message}))
    }

    fn format_error(&self, error: &str) -> String {
        format!("{}\n", serde_json::json!({"error": error}))
    }
}

pub struct MarkdownFormatter;

impl Formatter for MarkdownFormatter {
    fn format_search_results(&self, results: &SearchResults) -> String {
        if results.is_empty() {
            return format!("## No results found\n\nQuery: `{}`\n", results.query);
        }

        render(|output| {
            writeln!(output, "## Search Results\n")?;
            writeln!(output, "**Query:** `{}`\n", results.query)?;
            writeln!(output, "**Knowledge base:** {}\n", results.knowledge_base)?;
            writeln!(
                output,
                "Found {} results in {}ms\n",
                results.len(),
                results.duration_ms
            )?;

            for (i, result) in results.results.iter().enumerate() {
                writeln!(output, "### {}. Score: {:.3}\n", i + 1, result.score)?;
                writeln!(output, "**Point:** `{}`\n", result.id)?;
                writeln!(output, "```")?;
                writeln!(output, "{}", result.page_content().unwrap_or_default())?;
                writeln!(output, "```\n")?;
            }
            Ok(())
        })
    }

    fn format_status(&self, status: &StatusInfo) -> String {
        let icon = |ok: bool| if ok { "✅" } else { "❌" };

        render(|output| {
            writeln!(output, "## Status\n")?;
            writeln!(
                output,
                "### Embedding {}\n",
                icon(status.embedding_configured)
            )?;
            writeln!(output, "- **Model:** {}", status.embedding_model)?;
            writeln!(output, "- **URL:** `{}`", status.embedding_url)?;
            if let Some(ref probe) = status.embedding_probe {
                writeln!(output, "- **Probe:** {probe}")?;
            }
            writeln!(output)?;

            writeln!(
                output,
                "### Vector Store {}\n",
                icon(status.vector_store_connected)
            )?;
            writeln!(output, "- **URL:** `{}`", status.vector_store_url)?;
            writeln!(output, "- **Collections:** {}\n", status.collections)?;

            writeln!(
                output,
                "### Store ({}) {}\n",
                status.store_driver,
                icon(status.store_connected)
            )?;
            writeln!(output, "- **Knowledge bases:** {}", status.knowledge_bases)?;
            Ok(())
        })
    }

    fn format_bases(&self, bases: &[KnowledgeBase]) -> String {
        if bases.is_empty() {
            return "## Knowledge Bases\n\n*No knowledge bases.*\n".to_string();
        }

        render(|output| {
            writeln!(output, "## Knowledge Bases\n")?;
            writeln!(output, "| Name | Collection | Points | Synced | State |")?;
            writeln!(output, "|------|------------|--------|--------|-------|")?;
            for base in bases {
                writeln!(
                    output,
                    "| {} | `{}` | {} | {} | {} |",
                    base.name,
                    base.collection_name,
                    base.total_points,
                    base.synced_points,
                    base.sync_state()
                )?;
            }
            Ok(())
        })
    }

    fn format_base(&self, base: &KnowledgeBase) -> String {
        render(|output| {
            writeln!(output, "## {}\n", base.name)?;
            if !base.description.is_empty() {
                writeln!(output, "{}\n", base.description)?;
            }
            writeln!(output, "| Field | Value |")?;
            writeln!(output, "|-------|-------|")?;
            writeln!(output, "| ID | `{}` |", base.id)?;
            writeln!(output, "| Collection | `{}` |", base.collection_name)?;
            writeln!(output, "| Model | {} |", base.embedding_model)?;
            writeln!(output, "| Dimension | {} |", base.vector_dimension)?;
            writeln!(output, "| Points | {} |", base.total_points)?;
            writeln!(output, "| Synced | {} |", base.synced_points)?;
            writeln!(output, "| State | {} |", base.sync_state())?;
            writeln!(output, "| Last synced | {} |", synced_at(base))?;
            Ok(())
        })
    }

    fn format_points(&self, page: &PointPage) -> String {
        if page.points.is_empty() {
            return "*No points.*\n".to_string();
        }

        render(|output| {
            writeln!(output, "| ID | Synced | Content |")?;
            writeln!(output, "|----|--------|---------|")?;
            for point in &page.points {
                writeln!(
                    output,
                    "| `{}` | {} | {} |",
                    point.id,
                    point.synced,
                    truncate_chars(&single_line(&point.content), ROW_PREVIEW_CHARS)
                        .replace('|', "\\|")
                )?;
            }
            writeln!(
                output,
                "\nPage {} of {} ({} points)",
                page.page,
                page.total_pages.max(1),
                page.total
            )?;
            Ok(())
        })
    }

    fn format_point(&self, point: &KnowledgePoint) -> String {
        render(|output| {
            writeln!(output, "### Point `{}`\n", point.id)?;
            writeln!(output, "- **Synced:** {}", point.synced)?;
            writeln!(output, "- **Updated:** {}\n", point.updated_at.to_rfc3339())?;
            writeln!(output, "```")?;
            writeln!(output, "{}", point.content)?;
            writeln!(output, "```")?;
            Ok(())
        })
    }

    fn format_sync_result(&self, result: &SyncResult) -> String {
        render(|output| {
            writeln!(output, "## Sync Complete\n")?;
            writeln!(output, "| Metric | Value |")?;
            writeln!(output, "|--------|-------|")?;
            writeln!(output, "| Pending | {} |", result.total_pending)?;
            writeln!(output, "| Synced | {} |", result.synced_count)?;
            writeln!(output, "| Errors | {} |", result.error_count)?;
            writeln!(output, "| Batches | {} |", result.batches)?;
            if let Some(cost) = result.cost {
                writeln!(output, "| Cost | ${cost:.6} |")?;
            }
            writeln!(output, "| Duration | {}ms |", result.duration_ms)?;
            if !result.errors.is_empty() {
                writeln!(output, "\n### Errors\n")?;
                for detail in &result.errors {
                    writeln!(output, "- {detail}")?;
                }
            }
            Ok(())
        })
    }

    fn format_estimate(&self, report: &EstimateReport) -> String {
        let estimate = &report.estimate;
        render(|output| {
            writeln!(output, "## Estimate\n")?;
            writeln!(output, "| Metric | Value |")?;
            writeln!(output, "|--------|-------|")?;
            writeln!(output, "| Model | {} |", estimate.model)?;
            writeln!(output, "| Tokens | {} |", estimate.total_tokens)?;
            writeln!(output, "| Cost | ${:.6} |", estimate.estimated_cost)?;
            writeln!(output, "| Chunks | {} |", report.chunks)?;
            Ok(())
        })
    }

    fn format_message(&self, message: &str) -> String {
        format!("> {message}\n")
    }

    fn format_error(&self, error: &str) -> String {
        format!("> ⚠️ **Error:** {error}\n")
    }
}

pub fn get_formatter(format: OutputFormat) -> Box<dyn Formatter> {
    match format {
        OutputFormat::Text => Box::new(TextFormatter),
        OutputFormat::Json => Box::new(JsonFormatter::new(true)),
        OutputFormat::Markdown => Box::new(MarkdownFormatter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sync_result() -> SyncResult {
        SyncResult {
            knowledge_base_id: "kb-1".into(),
            total_pending: 3,
            synced_count: 2,
            error_count: 1,
            errors: vec!["point p3: empty content".into()],
            cost: Some(0.000012),
            batches: 1,
            duration_ms: 42,
        }
    }

    #[test]
    fn test_text_sync_result() {
        let output = TextFormatter.format_sync_result(&sync_result());
        assert!(output.contains("Synced:   2"));
        assert!(output.contains("Errors:   1"));
        assert!(output.contains("$0.000012"));
        assert!(output.contains("  - point p3: empty content"));
    }

    #[test]
    fn test_json_sync_result_parses() {
        let output = JsonFormatter::new(false).format_sync_result(&sync_result());
        let value: serde_json::Value = serde_json::from_str(&output).unwrap();
        assert_eq!(value["synced_count"], 2);
        assert_eq!(value["errors"][0], "point p3: empty content");
    }

    #[test]
    fn test_json_estimate_is_flat() {
        let report = EstimateReport {
            estimate: CostEstimate {
                model: "text-embedding-3-large".into(),
                items: 1,
                total_tokens: 100,
                estimated_cost: 0.000013,
                over_limit: 0,
            },
            chunks: 4,
            chunk_max_tokens: 30,
            chunk_overlap: 5,
        };
        let value: serde_json::Value =
            serde_json::from_str(&JsonFormatter::new(true).format_estimate(&report)).unwrap();
        assert_eq!(value["total_tokens"], 100);
        assert_eq!(value["chunks"], 4);
    }

    #[test]
    fn test_empty_listings() {
        assert_eq!(TextFormatter.format_bases(&[]), "No knowledge bases.\n");
        assert!(MarkdownFormatter.format_bases(&[]).contains("No knowledge bases"));
    }
}
