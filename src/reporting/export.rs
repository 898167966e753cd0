use serde::Serialize;

use crate::errors::ScanError;
use crate::models::{Finding, ScanRecord};
use super::formatter::{format_executive_summary, format_finding_markdown, format_scan_header};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
    Markdown,
    /// Rendered by an external service, not in-process.
    Pdf,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
            Self::Markdown => "md",
            Self::Pdf => "pdf",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv; charset=utf-8",
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Pdf => "application/pdf",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = ScanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "csv" => Ok(Self::Csv),
            "markdown" | "md" => Ok(Self::Markdown),
            "pdf" => Ok(Self::Pdf),
            other => Err(ScanError::InvalidInput(format!(
                "format must be one of: json, csv, markdown, pdf (got '{}')",
                other
            ))),
        }
    }
}

/// A rendered export, ready to be sent as a download.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDocument {
    pub filename: String,
    pub content_type: &'static str,
    pub body: String,
}

#[derive(Serialize)]
struct JsonExport<'a> {
    scan: &'a ScanRecord,
    findings: &'a [Finding],
}

pub fn export_scan(scan: &ScanRecord, findings: &[Finding], format: ExportFormat) -> Result<ExportDocument, ScanError> {
    let body = match format {
        ExportFormat::Json => serde_json::to_string_pretty(&JsonExport { scan, findings })?,
        ExportFormat::Csv => render_csv(findings),
        ExportFormat::Markdown => render_markdown(scan, findings),
        ExportFormat::Pdf => {
            return Err(ScanError::Unsupported(
                "PDF reports are produced by the report renderer service".into()
            ));
        }
    };

    Ok(ExportDocument {
        filename: format!("scan-{}.{}", scan.id, format.extension()),
        content_type: format.content_type(),
        body,
    })
}

const CSV_HEADER: &str = "title,severity,cve_id,affected_component,description,remediation_steps,reference_urls";

fn render_csv(findings: &[Finding]) -> String {
    let mut out = String::from(CSV_HEADER);
    out.push_str("\r\n");
    for f in findings {
        let references = f.reference_urls.join(" ");
        let fields = [
            f.title.as_str(),
            f.severity.as_str(),
            f.cve_id.as_deref().unwrap_or(""),
            f.affected_component.as_deref().unwrap_or(""),
            f.description.as_str(),
            f.remediation_steps.as_deref().unwrap_or(""),
            references.as_str(),
        ];
        let row: Vec<String> = fields.iter().map(|field| csv_field(field)).collect();
        out.push_str(&row.join(","));
        out.push_str("\r\n");
    }
    out
}

/// Quote a field per RFC 4180 when it contains a delimiter, quote or newline.
fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn render_markdown(scan: &ScanRecord, findings: &[Finding]) -> String {
    let mut report = format_scan_header(scan);
    report.push('\n');
    report.push_str(&format_executive_summary(&scan.severity_counts));
    report.push_str("\n---\n\n");
    if findings.is_empty() {
        report.push_str("No vulnerabilities were found during this assessment.\n");
    }
    for finding in findings {
        report.push_str(&format_finding_markdown(finding));
        report.push_str("\n---\n\n");
    }
    report
}
