//! I/O utilities for reading delimited text and resolving encodings.
//!
//! Every CSV read in muni-link flows through this module:
//!
//! - **Encoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Delimiters**: parsing of user-supplied delimiter labels and printable
//!   rendering for log lines.
//! - **Reader construction**: strict (non-flexible) readers so a ragged row is
//!   reported instead of silently misaligned.
//! - **Sidecars**: small helpers for the text files that travel next to a
//!   shapefile (`.prj`, `.cpg`).

use std::{
    fs::{self, File},
    io::{BufReader, Read},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use encoding_rs::{Encoding, UTF_8};

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

/// Resolves a `.cpg` code page label. Besides the usual encoding labels this
/// accepts the bare Windows code page numbers GIS tools write, such as `1252`
/// or `ANSI 1252`, and `65001` for UTF-8.
pub fn resolve_code_page(label: &str) -> Option<&'static Encoding> {
    let label = label.trim();
    let label = label
        .strip_prefix("ANSI ")
        .or_else(|| label.strip_prefix("ansi "))
        .unwrap_or(label)
        .trim();
    match label {
        "" => None,
        "65001" => Some(UTF_8),
        "88591" | "8859_1" => Encoding::for_label(b"iso-8859-1"),
        digits if digits.bytes().all(|b| b.is_ascii_digit()) => {
            Encoding::for_label(format!("cp{digits}").as_bytes())
        }
        other => Encoding::for_label(other.as_bytes()),
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(path: &Path, delimiter: u8) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// Path of a sidecar file sharing `path`'s stem, e.g. `municipios.prj`.
pub fn sidecar_path(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

pub fn read_sidecar(path: &Path, extension: &str) -> Result<Option<String>> {
    let sidecar = sidecar_path(path, extension);
    if !sidecar.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(&sidecar).with_context(|| format!("Reading sidecar {sidecar:?}"))?;
    Ok(Some(contents))
}

pub fn write_sidecar(path: &Path, extension: &str, contents: &str) -> Result<()> {
    let sidecar = sidecar_path(path, extension);
    fs::write(&sidecar, contents).with_context(|| format!("Writing sidecar {sidecar:?}"))
}
