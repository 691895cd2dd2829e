//! EXIF UserComment handling for recipe images.
//!
//! A saved recipe is embedded as a `Recipe metadata: {json}` line at the end
//! of the image's UserComment, so the image alone is enough to restore it.
//! The comment is stored as `UNICODE\0` followed by UTF-16BE text.

use super::types::RecipeRecord;
use crate::config::RecipeConfig;
use crate::error::{LoraError, Result};
use regex::Regex;
use serde_json::Value;
use std::path::Path;
use std::sync::LazyLock;
use tracing::debug;

const UNICODE_PREFIX: &[u8] = b"UNICODE\0";
const ASCII_PREFIX: &[u8] = b"ASCII\0\0\0";

const TAG_EXIF_IFD: u16 = 0x8769;
const TAG_USER_COMMENT: u16 = 0x9286;
const TYPE_LONG: u16 = 4;
const TYPE_UNDEFINED: u16 = 7;

const VP8X_FLAG_ALPHA: u8 = 0x10;
const VP8X_FLAG_EXIF: u8 = 0x08;

static RECIPE_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)Recipe metadata: (\{.*\})").expect("recipe block regex must compile")
});

static RECIPE_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\n?Recipe metadata: \{.*\}").expect("recipe line regex must compile")
});

/// Reads and writes the free-text comment embedded in an image.
pub trait ImageMetadataStore: Send + Sync {
    /// `Ok(None)` when the image carries no comment.
    fn extract_embedded_metadata(&self, path: &Path) -> Result<Option<String>>;

    /// Replace the image's comment with `text`.
    fn write_embedded_metadata(&self, path: &Path, text: &str) -> Result<()>;
}

// ========================================
// Comment text
// ========================================

pub fn encode_user_comment(text: &str) -> Vec<u8> {
    let mut out = UNICODE_PREFIX.to_vec();
    for unit in text.encode_utf16() {
        out.extend_from_slice(&unit.to_be_bytes());
    }
    out
}

pub fn decode_user_comment(raw: &[u8]) -> String {
    let text = if let Some(body) = raw.strip_prefix(UNICODE_PREFIX) {
        let units: Vec<u16> = body
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&units)
    } else if let Some(body) = raw.strip_prefix(ASCII_PREFIX) {
        String::from_utf8_lossy(body).into_owned()
    } else {
        String::from_utf8_lossy(raw).into_owned()
    };
    text.trim_end_matches('\0').to_string()
}

/// Parse the embedded recipe block. Malformed JSON counts as absent.
pub fn extract_recipe_metadata(comment: &str) -> Option<Value> {
    let json = RECIPE_BLOCK.captures(comment)?.get(1)?.as_str();
    match serde_json::from_str(json) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!("Ignoring malformed recipe block: {}", e);
            None
        }
    }
}

/// `comment` without any previously embedded recipe block.
pub fn strip_recipe_metadata(comment: &str) -> String {
    RECIPE_LINE.replace(comment, "").into_owned()
}

/// Comment text with `recipe` appended after whatever `existing` held.
pub fn append_recipe_metadata_comment(existing: &str, recipe: &RecipeRecord) -> Result<String> {
    let mut comment = strip_recipe_metadata(existing);
    if !comment.is_empty() && !comment.ends_with('\n') {
        comment.push('\n');
    }
    comment.push_str(RecipeConfig::METADATA_MARKER);
    comment.push_str(&serde_json::to_string(&recipe.embedded_summary())?);
    Ok(comment)
}

/// Embed `recipe` into the image at `path`, keeping any other comment text.
pub fn append_recipe_metadata(
    store: &dyn ImageMetadataStore,
    path: &Path,
    recipe: &RecipeRecord,
) -> Result<()> {
    let existing = match store.extract_embedded_metadata(path) {
        Ok(comment) => comment.unwrap_or_default(),
        Err(e) => {
            debug!("No readable comment in {}: {}", path.display(), e);
            String::new()
        }
    };
    let comment = append_recipe_metadata_comment(&existing, recipe)?;
    store.write_embedded_metadata(path, &comment)
}

// ========================================
// TIFF (EXIF payload)
// ========================================

/// Minimal big-endian TIFF holding only an Exif IFD with a UserComment.
pub fn build_user_comment_tiff(user_comment: &[u8]) -> Vec<u8> {
    const IFD0_OFFSET: u32 = 8;
    const EXIF_IFD_OFFSET: u32 = IFD0_OFFSET + 18;
    const DATA_OFFSET: u32 = EXIF_IFD_OFFSET + 18;

    let mut out = Vec::with_capacity(DATA_OFFSET as usize + user_comment.len());
    out.extend_from_slice(b"MM\x00\x2a");
    out.extend_from_slice(&IFD0_OFFSET.to_be_bytes());

    out.extend_from_slice(&1u16.to_be_bytes());
    push_ifd_entry(&mut out, TAG_EXIF_IFD, TYPE_LONG, 1, EXIF_IFD_OFFSET);
    out.extend_from_slice(&0u32.to_be_bytes());

    out.extend_from_slice(&1u16.to_be_bytes());
    push_ifd_entry(
        &mut out,
        TAG_USER_COMMENT,
        TYPE_UNDEFINED,
        user_comment.len() as u32,
        DATA_OFFSET,
    );
    out.extend_from_slice(&0u32.to_be_bytes());

    out.extend_from_slice(user_comment);
    out
}

fn push_ifd_entry(out: &mut Vec<u8>, tag: u16, kind: u16, count: u32, value: u32) {
    out.extend_from_slice(&tag.to_be_bytes());
    out.extend_from_slice(&kind.to_be_bytes());
    out.extend_from_slice(&count.to_be_bytes());
    out.extend_from_slice(&value.to_be_bytes());
}

struct TiffReader<'a> {
    data: &'a [u8],
    big_endian: bool,
}

impl TiffReader<'_> {
    fn u16_at(&self, pos: usize) -> Option<u16> {
        let bytes: [u8; 2] = self.data.get(pos..pos + 2)?.try_into().ok()?;
        Some(if self.big_endian {
            u16::from_be_bytes(bytes)
        } else {
            u16::from_le_bytes(bytes)
        })
    }

    fn u32_at(&self, pos: usize) -> Option<u32> {
        let bytes: [u8; 4] = self.data.get(pos..pos + 4)?.try_into().ok()?;
        Some(if self.big_endian {
            u32::from_be_bytes(bytes)
        } else {
            u32::from_le_bytes(bytes)
        })
    }

    /// Position of the entry for `tag` in the IFD at `ifd`.
    fn find_entry(&self, ifd: usize, tag: u16) -> Option<usize> {
        let count = self.u16_at(ifd)? as usize;
        (0..count)
            .map(|i| ifd + 2 + i * 12)
            .find(|&entry| self.u16_at(entry) == Some(tag))
    }

    fn entry_bytes(&self, entry: usize) -> Option<&[u8]> {
        let count = self.u32_at(entry + 4)? as usize;
        let start = if count <= 4 {
            entry + 8
        } else {
            self.u32_at(entry + 8)? as usize
        };
        self.data.get(start..start.checked_add(count)?)
    }
}

/// Raw UserComment bytes from an EXIF payload, with or without the `Exif\0\0` header.
pub fn read_user_comment_tiff(payload: &[u8]) -> Option<Vec<u8>> {
    let data = payload.strip_prefix(b"Exif\0\0").unwrap_or(payload);
    let big_endian = match data.get(0..2)? {
        b"MM" => true,
        b"II" => false,
        _ => return None,
    };
    let reader = TiffReader { data, big_endian };
    let ifd0 = reader.u32_at(4)? as usize;
    let exif_entry = reader.find_entry(ifd0, TAG_EXIF_IFD)?;
    let exif_ifd = reader.u32_at(exif_entry + 8)? as usize;
    let comment_entry = reader.find_entry(exif_ifd, TAG_USER_COMMENT)?;
    reader.entry_bytes(comment_entry).map(<[u8]>::to_vec)
}

// ========================================
// WebP container
// ========================================

#[derive(Debug, Clone)]
struct Chunk {
    fourcc: [u8; 4],
    data: Vec<u8>,
}

fn invalid_webp(message: &str) -> LoraError {
    LoraError::Image {
        message: format!("Invalid WebP: {}", message),
    }
}

fn parse_chunks(bytes: &[u8]) -> Result<Vec<Chunk>> {
    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WEBP" {
        return Err(invalid_webp("missing RIFF/WEBP header"));
    }
    let riff_size = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
    let end = bytes.len().min(8 + riff_size);

    let mut chunks = Vec::new();
    let mut pos = 12;
    while pos + 8 <= end {
        let fourcc = [bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]];
        let size = u32::from_le_bytes([bytes[pos + 4], bytes[pos + 5], bytes[pos + 6], bytes[pos + 7]])
            as usize;
        let start = pos + 8;
        let stop = start + size;
        if stop > end {
            return Err(invalid_webp("truncated chunk"));
        }
        chunks.push(Chunk {
            fourcc,
            data: bytes[start..stop].to_vec(),
        });
        pos = stop + (size & 1);
    }
    Ok(chunks)
}

fn write_riff(chunks: &[Chunk]) -> Vec<u8> {
    let body: usize = chunks.iter().map(|c| 8 + c.data.len() + (c.data.len() & 1)).sum();
    let mut out = Vec::with_capacity(12 + body);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((4 + body) as u32).to_le_bytes());
    out.extend_from_slice(b"WEBP");
    for chunk in chunks {
        out.extend_from_slice(&chunk.fourcc);
        out.extend_from_slice(&(chunk.data.len() as u32).to_le_bytes());
        out.extend_from_slice(&chunk.data);
        if chunk.data.len() & 1 == 1 {
            out.push(0);
        }
    }
    out
}

/// Canvas width, height and alpha usage of a simple-format bitstream chunk.
fn canvas_info(chunk: &Chunk) -> Option<(u32, u32, bool)> {
    let d = &chunk.data;
    match &chunk.fourcc {
        b"VP8L" => {
            if d.len() < 5 || d[0] != 0x2f {
                return None;
            }
            let bits = u32::from_le_bytes([d[1], d[2], d[3], d[4]]);
            let width = (bits & 0x3fff) + 1;
            let height = ((bits >> 14) & 0x3fff) + 1;
            Some((width, height, (bits >> 28) & 1 == 1))
        }
        b"VP8 " => {
            if d.len() < 10 || d[3..6] != [0x9d, 0x01, 0x2a] {
                return None;
            }
            let width = u16::from_le_bytes([d[6], d[7]]) as u32 & 0x3fff;
            let height = u16::from_le_bytes([d[8], d[9]]) as u32 & 0x3fff;
            Some((width, height, false))
        }
        _ => None,
    }
}

/// Canvas dimensions are stored minus one, so a zero-sized bitstream is rejected.
fn vp8x_chunk(width: u32, height: u32, alpha: bool) -> Result<Chunk> {
    let width_minus_one = width
        .checked_sub(1)
        .ok_or_else(|| invalid_webp("zero canvas width"))?;
    let height_minus_one = height
        .checked_sub(1)
        .ok_or_else(|| invalid_webp("zero canvas height"))?;

    let mut data = vec![0u8; 10];
    data[0] = VP8X_FLAG_EXIF | if alpha { VP8X_FLAG_ALPHA } else { 0 };
    data[4..7].copy_from_slice(&width_minus_one.to_le_bytes()[..3]);
    data[7..10].copy_from_slice(&height_minus_one.to_le_bytes()[..3]);
    Ok(Chunk {
        fourcc: *b"VP8X",
        data,
    })
}

/// Return `webp` with its EXIF chunk replaced by `tiff`.
///
/// Simple-format files are promoted to the extended format.
pub fn embed_webp_exif(webp: &[u8], tiff: Vec<u8>) -> Result<Vec<u8>> {
    let mut chunks = parse_chunks(webp)?;
    chunks.retain(|c| &c.fourcc != b"EXIF");

    match chunks.iter_mut().find(|c| &c.fourcc == b"VP8X") {
        Some(header) => {
            let flags = header
                .data
                .first_mut()
                .ok_or_else(|| invalid_webp("empty VP8X chunk"))?;
            *flags |= VP8X_FLAG_EXIF;
        }
        None => {
            let (width, height, alpha) = chunks
                .first()
                .and_then(canvas_info)
                .ok_or_else(|| invalid_webp("unrecognised bitstream"))?;
            chunks.insert(0, vp8x_chunk(width, height, alpha)?);
        }
    }

    let exif = Chunk {
        fourcc: *b"EXIF",
        data: tiff,
    };
    match chunks.iter().position(|c| &c.fourcc == b"XMP ") {
        Some(idx) => chunks.insert(idx, exif),
        None => chunks.push(exif),
    }
    Ok(write_riff(&chunks))
}

/// Raw UserComment of a WebP file, if it has an EXIF chunk carrying one.
pub fn read_webp_user_comment(webp: &[u8]) -> Result<Option<Vec<u8>>> {
    Ok(parse_chunks(webp)?
        .iter()
        .find(|c| &c.fourcc == b"EXIF")
        .and_then(|c| read_user_comment_tiff(&c.data)))
}

/// Default [`ImageMetadataStore`], working on the EXIF chunk of WebP files.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebpExifStore;

impl ImageMetadataStore for WebpExifStore {
    fn extract_embedded_metadata(&self, path: &Path) -> Result<Option<String>> {
        let bytes = std::fs::read(path).map_err(|e| LoraError::io_with_path(e, path))?;
        Ok(read_webp_user_comment(&bytes)?.map(|raw| decode_user_comment(&raw)))
    }

    fn write_embedded_metadata(&self, path: &Path, text: &str) -> Result<()> {
        let bytes = std::fs::read(path).map_err(|e| LoraError::io_with_path(e, path))?;
        let tiff = build_user_comment_tiff(&encode_user_comment(text));
        let updated = embed_webp_exif(&bytes, tiff)?;
        std::fs::write(path, updated).map_err(|e| LoraError::io_with_path(e, path))
    }
}
