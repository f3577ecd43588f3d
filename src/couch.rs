//! CouchDB path builders.
//!
//! Convenience builders that turn `server + database + document` parameters
//! into a configured [`Exchange`]: each takes the exchange, sets its
//! method, target, headers, and body, and returns it **unexecuted** —
//! running it is always a separate, explicit step through
//! [`BlockingClient`](crate::BlockingClient) or
//! [`Multiplexer`](crate::Multiplexer).
//!
//! Database and document names are percent-encoded into the target.
//!
//! # Example
//!
//! ```
//! use couchwire::{Exchange, couch};
//!
//! let ex = couch::document_get(Exchange::new(), "http://127.0.0.1:5984", "mail", "inbox-1")?;
//! assert_eq!(ex.target(), "http://127.0.0.1:5984/mail/inbox-1");
//! # Ok::<(), couchwire::Error>(())
//! ```

// ============================================================================
// Imports
// ============================================================================

use std::path::Path;

use url::Url;

use crate::error::{Error, Result};
use crate::exchange::{Exchange, Method};

// ============================================================================
// Target Assembly
// ============================================================================

/// Joins percent-encoded path segments onto a validated server address.
fn join(server: &str, segments: &[&str]) -> Result<String> {
    let base = Url::parse(server)?;
    let mut target = base.as_str().trim_end_matches('/').to_string();
    for segment in segments {
        target.push('/');
        target.push_str(&urlencoding::encode(segment));
    }
    Ok(target)
}

// ============================================================================
// Database Builders
// ============================================================================

/// Lists all databases on the server.
pub fn all_databases(mut exchange: Exchange, server: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &["_all_dbs"])?);
    Ok(exchange)
}

/// Creates the database `db`.
pub fn database_create(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Put)
        .set_target(join(server, &[db])?);
    Ok(exchange)
}

/// Deletes the database `db`.
pub fn database_delete(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Delete)
        .set_target(join(server, &[db])?);
    Ok(exchange)
}

/// Fetches information about the database `db`.
pub fn database_info(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db])?);
    Ok(exchange)
}

/// Fetches the changes feed of `db`.
///
/// Add feed options with [`Exchange::append_param`].
pub fn database_changes(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, "_changes"])?);
    Ok(exchange)
}

/// Fetches the revision limit of `db`.
pub fn revs_limit(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, "_revs_limit"])?);
    Ok(exchange)
}

/// Sets the revision limit of `db`.
pub fn set_revs_limit(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    limit: u32,
) -> Result<Exchange> {
    exchange
        .set_method(Method::Put)
        .set_target(join(server, &[db, "_revs_limit"])?);
    exchange.set_body(limit.to_string().as_bytes())?;
    Ok(exchange)
}

/// Starts compaction of `db`.
pub fn database_compact(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Post)
        .set_target(join(server, &[db, "_compact"])?);
    exchange.set_body(b"{}")?;
    Ok(exchange)
}

// ============================================================================
// Document Builders
// ============================================================================

/// Retrieves the document `id`.
pub fn document_get(mut exchange: Exchange, server: &str, db: &str, id: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, id])?);
    Ok(exchange)
}

/// Retrieves a specific revision of the document `id`.
pub fn document_get_rev(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    id: &str,
    rev: &str,
) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, id])?);
    exchange.append_param("rev", rev)?;
    Ok(exchange)
}

/// Retrieves the document `id` with its list of available revision ids.
pub fn document_revisions(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    id: &str,
) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, id])?);
    exchange.append_param("revs", "true")?;
    Ok(exchange)
}

/// Probes the document `id` for basic information, including its current
/// revision ETag.
///
/// Headers-only; the response headers are echoed into the inbound buffer.
pub fn document_info(mut exchange: Exchange, server: &str, db: &str, id: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Head)
        .set_target(join(server, &[db, id])?);
    Ok(exchange)
}

/// Creates or replaces the document `id` with `data`.
///
/// Updating an existing document requires a `_rev` property in the body.
pub fn document_create(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    id: &str,
    data: &[u8],
) -> Result<Exchange> {
    exchange
        .set_method(Method::Put)
        .set_target(join(server, &[db, id])?);
    exchange.set_body(data)?;
    Ok(exchange)
}

/// Creates a document with a server-generated id.
pub fn document_create_auto(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    data: &[u8],
) -> Result<Exchange> {
    exchange
        .set_method(Method::Post)
        .set_target(join(server, &[db])?);
    exchange.set_body(data)?;
    Ok(exchange)
}

/// Lists all documents in `db`.
pub fn all_documents(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, "_all_docs"])?);
    Ok(exchange)
}

/// Lists all documents in `db` in modification order.
pub fn all_documents_by_seq(mut exchange: Exchange, server: &str, db: &str) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, "_all_docs_by_seq"])?);
    Ok(exchange)
}

/// Deletes the document `id` at revision `rev`, with all its attachments.
pub fn document_delete(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    id: &str,
    rev: &str,
) -> Result<Exchange> {
    exchange
        .set_method(Method::Delete)
        .set_target(join(server, &[db, id])?);
    exchange.append_param("rev", rev)?;
    Ok(exchange)
}

/// Copies the document `id` to `new_id`, server side.
///
/// Pass the target revision to overwrite an existing destination.
pub fn document_copy(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    id: &str,
    new_id: &str,
    rev: Option<&str>,
) -> Result<Exchange> {
    exchange
        .set_method(Method::Copy)
        .set_target(join(server, &[db, id])?);
    let destination = match rev {
        Some(rev) => format!("Destination: {new_id}?rev={rev}"),
        None => format!("Destination: {new_id}"),
    };
    exchange.add_header(destination);
    Ok(exchange)
}

// ============================================================================
// Attachment Builders
// ============================================================================

/// Fetches the attachment `name` on document `id`.
pub fn attachment_get(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    id: &str,
    name: &str,
) -> Result<Exchange> {
    exchange
        .set_method(Method::Get)
        .set_target(join(server, &[db, id, name])?);
    Ok(exchange)
}

/// Uploads the file at `path` as an attachment on document `doc`.
///
/// The content type is sniffed from the file extension, falling back to
/// `application/octet-stream` for binary or unknown files.
pub fn attachment_upload(
    mut exchange: Exchange,
    server: &str,
    db: &str,
    doc: &str,
    path: &Path,
) -> Result<Exchange> {
    let data = std::fs::read(path)?;
    let name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| Error::invalid_target(format!("unusable attachment path: {}", path.display())))?;

    exchange
        .set_method(Method::Put)
        .set_target(join(server, &[db, doc, name])?);
    exchange.add_header(format!("Content-Type: {}", sniff_content_type(path)));
    exchange.set_body(&data)?;
    Ok(exchange)
}

/// Content type by file extension.
fn sniff_content_type(path: &Path) -> &'static str {
    let Some(extension) = path.extension().and_then(|ext| ext.to_str()) else {
        return "application/octet-stream";
    };
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "tif" | "tiff" => "image/tiff",
        "pdf" => "application/pdf",
        "c" | "h" | "cpp" | "cxx" | "py" | "md" | "text" | "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

// ============================================================================
// Tests
// ============================================================================
