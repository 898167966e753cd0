pub mod export;
pub mod formatter;

pub use export::{export_scan, ExportDocument, ExportFormat};
