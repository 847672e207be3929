mod content_type;
mod file_exporter;

pub use content_type::ContentType;
pub use file_exporter::FileExporter;
