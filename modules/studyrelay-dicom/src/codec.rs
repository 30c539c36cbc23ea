//! Part-10 file reading and writing.
//!
//! Reads either a full dataset or just the header (stopping before
//! PixelData and recording its byte offset, so large files can be tail-
//! copied without the pixel data ever entering the heap). Writes a
//! regenerated file meta group followed by the dataset in ascending tag
//! order, dropping group-length elements.

use std::fs::File;
use std::io::{BufReader, BufWriter, Cursor, Read, Seek, Write};
use std::path::Path;

use crate::attributes::{Attribute, AttributeSet, AttributeValue};
use crate::dictionary::{self, tags};
use crate::error::{DicomError, Result};
use crate::syntax;
use crate::tag::Tag;
use crate::vr::Vr;

pub const PREAMBLE_LEN: usize = 128;
const MAGIC: &[u8; 4] = b"DICM";
const UNDEFINED_LEN: u32 = 0xFFFF_FFFF;

const ITEM: Tag = Tag::new(0xFFFE, 0xE000);
const ITEM_DELIM: Tag = Tag::new(0xFFFE, 0xE00D);
const SEQ_DELIM: Tag = Tag::new(0xFFFE, 0xE0DD);

pub const IMPLEMENTATION_CLASS_UID: &str = "1.2.826.0.1.3680043.10.1185.1";
pub const IMPLEMENTATION_VERSION_NAME: &str = "STUDYRELAY_01";

/// The group-0002 file meta information the gateway reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub media_storage_sop_class_uid: String,
    pub media_storage_sop_instance_uid: String,
    pub transfer_syntax_uid: String,
    pub implementation_class_uid: String,
    pub implementation_version_name: String,
}

impl FileMeta {
    pub fn new(sop_class: &str, sop_instance: &str, transfer_syntax: &str) -> Self {
        Self {
            media_storage_sop_class_uid: sop_class.to_string(),
            media_storage_sop_instance_uid: sop_instance.to_string(),
            transfer_syntax_uid: transfer_syntax.to_string(),
            implementation_class_uid: IMPLEMENTATION_CLASS_UID.to_string(),
            implementation_version_name: IMPLEMENTATION_VERSION_NAME.to_string(),
        }
    }

    /// Regenerate meta for an anonymized dataset: media storage UIDs track
    /// the (possibly rewritten) dataset, syntax is preserved.
    pub fn for_dataset(dataset: &AttributeSet, transfer_syntax: &str) -> Self {
        Self::new(
            dataset.sop_class_uid().unwrap_or_default(),
            dataset.sop_uid().unwrap_or_default(),
            transfer_syntax,
        )
    }
}

/// A fully decoded file.
#[derive(Debug, Clone)]
pub struct DicomFile {
    pub meta: FileMeta,
    pub dataset: AttributeSet,
}

/// A header-only read: everything strictly before PixelData.
#[derive(Debug, Clone)]
pub struct HeaderReadout {
    pub meta: FileMeta,
    pub header: AttributeSet,
    /// Offset of the start of the PixelData element, when one exists.
    pub pixel_data_offset: Option<u64>,
    pub file_len: u64,
}

/// Read and decode an entire file, pixel data included.
pub fn read_file(path: &Path) -> Result<DicomFile> {
    let file = File::open(path)?;
    parse(BufReader::new(file))
}

/// Decode a part-10 object already held in memory.
pub fn read_bytes(bytes: &[u8]) -> Result<DicomFile> {
    parse(Cursor::new(bytes))
}

fn parse<R: Read + Seek>(r: R) -> Result<DicomFile> {
    let mut parser = Parser::new(r);
    let meta = parser.read_preamble_and_meta()?;
    let implicit = dataset_is_implicit(&meta)?;

    let mut dataset = AttributeSet::new();
    while let Some(attr) = parser.read_element(implicit)? {
        if attr.tag.is_group_length() {
            continue;
        }
        dataset.insert(attr);
    }
    Ok(DicomFile { meta, dataset })
}

/// Read attributes up to (but not including) PixelData, recording the byte
/// offset at which reading stopped.
pub fn read_header(path: &Path) -> Result<HeaderReadout> {
    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let mut parser = Parser::new(BufReader::new(file));
    let meta = parser.read_preamble_and_meta()?;
    let implicit = dataset_is_implicit(&meta)?;

    let mut header = AttributeSet::new();
    let mut pixel_data_offset = None;
    loop {
        let start = parser.offset;
        // Peek the tag alone: the pixel data value must never be read.
        let tag = match parser.try_read_tag()? {
            Some(tag) => tag,
            None => break,
        };
        if tag >= tags::PIXEL_DATA {
            pixel_data_offset = Some(start);
            break;
        }
        let attr = parser.read_element_body(tag, implicit)?;
        if !attr.tag.is_group_length() {
            header.insert(attr);
        }
    }
    Ok(HeaderReadout {
        meta,
        header,
        pixel_data_offset,
        file_len,
    })
}

fn dataset_is_implicit(meta: &FileMeta) -> Result<bool> {
    let ts = meta.transfer_syntax_uid.as_str();
    if !syntax::is_readable(ts) {
        return Err(DicomError::UnsupportedTransferSyntax(ts.to_string()));
    }
    Ok(syntax::is_implicit_vr(ts))
}

/// Write a complete file: preamble, magic, regenerated file meta, dataset.
/// Callers own atomicity (write to a temp path, fsync, rename).
pub fn write_file(path: &Path, meta: &FileMeta, dataset: &AttributeSet) -> Result<()> {
    let file = File::create(path)?;
    let mut w = BufWriter::new(file);
    write_to(&mut w, meta, dataset)?;
    w.flush()?;
    w.into_inner()
        .map_err(|e| DicomError::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

pub fn write_to<W: Write>(w: &mut W, meta: &FileMeta, dataset: &AttributeSet) -> Result<()> {
    w.write_all(&[0u8; PREAMBLE_LEN])?;
    w.write_all(MAGIC)?;
    w.write_all(&encode_file_meta(meta))?;
    let implicit = syntax::is_implicit_vr(&meta.transfer_syntax_uid);
    w.write_all(&encode_dataset(dataset, implicit)?)?;
    Ok(())
}

/// Encode the group-0002 block, group length element included. File meta
/// is always explicit VR little endian regardless of the dataset syntax.
pub fn encode_file_meta(meta: &FileMeta) -> Vec<u8> {
    let mut body = Vec::new();
    encode_explicit(
        &mut body,
        Tag::new(0x0002, 0x0001),
        Vr::Ob,
        &[0x00, 0x01],
    );
    encode_explicit_text(
        &mut body,
        Tag::new(0x0002, 0x0002),
        Vr::Ui,
        &meta.media_storage_sop_class_uid,
    );
    encode_explicit_text(
        &mut body,
        Tag::new(0x0002, 0x0003),
        Vr::Ui,
        &meta.media_storage_sop_instance_uid,
    );
    encode_explicit_text(
        &mut body,
        Tag::new(0x0002, 0x0010),
        Vr::Ui,
        &meta.transfer_syntax_uid,
    );
    encode_explicit_text(
        &mut body,
        Tag::new(0x0002, 0x0012),
        Vr::Ui,
        &meta.implementation_class_uid,
    );
    encode_explicit_text(
        &mut body,
        Tag::new(0x0002, 0x0013),
        Vr::Sh,
        &meta.implementation_version_name,
    );

    let mut out = Vec::with_capacity(body.len() + 12);
    encode_explicit(
        &mut out,
        Tag::new(0x0002, 0x0000),
        Vr::Ul,
        &(body.len() as u32).to_le_bytes(),
    );
    out.extend_from_slice(&body);
    out
}

/// Encode dataset elements in ascending tag order, excluding group-length
/// elements and anything in the file meta group.
pub fn encode_dataset(dataset: &AttributeSet, implicit: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for attr in dataset.iter() {
        if attr.tag.is_group_length() || attr.tag.is_file_meta() {
            continue;
        }
        encode_element(&mut out, attr, implicit)?;
    }
    Ok(out)
}

fn encode_element(out: &mut Vec<u8>, attr: &Attribute, implicit: bool) -> Result<()> {
    let (bytes, undefined): (Vec<u8>, bool) = match &attr.value {
        AttributeValue::Text(s) => {
            let mut b = s.as_bytes().to_vec();
            if b.len() % 2 == 1 {
                b.push(attr.vr.pad_byte());
            }
            (b, false)
        }
        AttributeValue::Bytes(b) => {
            let mut b = b.clone();
            if b.len() % 2 == 1 {
                b.push(0x00);
            }
            (b, false)
        }
        AttributeValue::Undefined(span) => (span.clone(), true),
    };

    put_tag(out, attr.tag);
    if implicit {
        if undefined {
            out.extend_from_slice(&UNDEFINED_LEN.to_le_bytes());
        } else {
            out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        }
    } else {
        out.extend_from_slice(&attr.vr.as_bytes());
        if attr.vr.has_long_length() {
            out.extend_from_slice(&[0u8, 0u8]);
            if undefined {
                out.extend_from_slice(&UNDEFINED_LEN.to_le_bytes());
            } else {
                out.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
            }
        } else {
            if undefined {
                return Err(DicomError::parse(
                    0,
                    format!("undefined length is not valid for VR {}", attr.vr),
                ));
            }
            if bytes.len() > u16::MAX as usize {
                return Err(DicomError::parse(
                    0,
                    format!("value of {} too long for short-form VR {}", attr.tag, attr.vr),
                ));
            }
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
        }
    }
    out.extend_from_slice(&bytes);
    if undefined {
        put_tag(out, SEQ_DELIM);
        out.extend_from_slice(&0u32.to_le_bytes());
    }
    Ok(())
}

fn encode_explicit(out: &mut Vec<u8>, tag: Tag, vr: Vr, value: &[u8]) {
    put_tag(out, tag);
    out.extend_from_slice(&vr.as_bytes());
    if vr.has_long_length() {
        out.extend_from_slice(&[0u8, 0u8]);
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&(value.len() as u16).to_le_bytes());
    }
    out.extend_from_slice(value);
}

fn encode_explicit_text(out: &mut Vec<u8>, tag: Tag, vr: Vr, value: &str) {
    let mut b = value.as_bytes().to_vec();
    if b.len() % 2 == 1 {
        b.push(vr.pad_byte());
    }
    encode_explicit(out, tag, vr, &b);
}

fn put_tag(out: &mut Vec<u8>, tag: Tag) {
    out.extend_from_slice(&tag.group().to_le_bytes());
    out.extend_from_slice(&tag.element().to_le_bytes());
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Parser<R> {
    r: R,
    offset: u64,
}

impl<R: Read + Seek> Parser<R> {
    fn new(r: R) -> Self {
        Self { r, offset: 0 }
    }

    fn read_preamble_and_meta(&mut self) -> Result<FileMeta> {
        let mut head = [0u8; PREAMBLE_LEN + 4];
        self.read_exact(&mut head)?;
        if &head[PREAMBLE_LEN..] != MAGIC {
            return Err(DicomError::NotDicom(
                "missing DICM magic after preamble".to_string(),
            ));
        }

        // Group length bounds the meta block; required by PS3.10 and always
        // written by this gateway.
        let start = self.offset;
        let first = self
            .read_element(false)?
            .ok_or_else(|| DicomError::parse(start, "truncated file meta"))?;
        if first.tag != Tag::new(0x0002, 0x0000) {
            return Err(DicomError::parse(
                start,
                format!("expected file meta group length, found {}", first.tag),
            ));
        }
        let meta_len = match &first.value {
            AttributeValue::Bytes(b) if b.len() == 4 => {
                u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64
            }
            _ => return Err(DicomError::parse(start, "malformed file meta group length")),
        };

        let mut block = vec![0u8; meta_len as usize];
        self.read_exact(&mut block)?;

        let mut meta_parser = Parser::new(Cursor::new(block));
        let mut meta = FileMeta::new("", "", "");
        while let Some(attr) = meta_parser.read_element(false)? {
            let text = attr.as_str().unwrap_or_default().to_string();
            match (attr.tag.group(), attr.tag.element()) {
                (0x0002, 0x0002) => meta.media_storage_sop_class_uid = text,
                (0x0002, 0x0003) => meta.media_storage_sop_instance_uid = text,
                (0x0002, 0x0010) => meta.transfer_syntax_uid = text,
                (0x0002, 0x0012) => meta.implementation_class_uid = text,
                (0x0002, 0x0013) => meta.implementation_version_name = text,
                _ => {}
            }
        }
        if meta.transfer_syntax_uid.is_empty() {
            return Err(DicomError::parse(start, "file meta lacks a transfer syntax"));
        }
        Ok(meta)
    }

    /// Read one element, or None at a clean end of stream.
    fn read_element(&mut self, implicit: bool) -> Result<Option<Attribute>> {
        let tag = match self.try_read_tag()? {
            Some(t) => t,
            None => return Ok(None),
        };
        Ok(Some(self.read_element_body(tag, implicit)?))
    }

    /// Decode the remainder of an element whose tag has been consumed.
    fn read_element_body(&mut self, tag: Tag, implicit: bool) -> Result<Attribute> {
        let (vr, len) = if implicit {
            let len = self.read_u32()?;
            (dictionary::vr_for(tag), len)
        } else {
            let mut vr_bytes = [0u8; 2];
            self.read_exact(&mut vr_bytes)?;
            let vr = Vr::from_bytes(vr_bytes).ok_or_else(|| {
                DicomError::parse(
                    self.offset - 2,
                    format!("unknown VR {:02x}{:02x} for {tag}", vr_bytes[0], vr_bytes[1]),
                )
            })?;
            let len = if vr.has_long_length() {
                let mut reserved = [0u8; 2];
                self.read_exact(&mut reserved)?;
                self.read_u32()?
            } else {
                self.read_u16()? as u32
            };
            (vr, len)
        };

        let value = if len == UNDEFINED_LEN {
            AttributeValue::Undefined(self.read_undefined_value(implicit)?)
        } else if vr.is_string() {
            let mut buf = vec![0u8; len as usize];
            self.read_exact(&mut buf)?;
            AttributeValue::Text(String::from_utf8_lossy(&buf).into_owned())
        } else {
            let mut buf = vec![0u8; len as usize];
            self.read_exact(&mut buf)?;
            AttributeValue::Bytes(buf)
        };

        Ok(Attribute { tag, vr, value })
    }

    /// Collect the raw encoded span of an undefined-length value, up to but
    /// not including the sequence delimitation item.
    fn read_undefined_value(&mut self, implicit: bool) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        loop {
            let start = self.offset;
            let tag = self.read_tag()?;
            let len = self.read_u32()?;
            if tag == SEQ_DELIM {
                return Ok(buf);
            }
            if tag != ITEM {
                return Err(DicomError::parse(
                    start,
                    format!("expected item tag in undefined-length value, found {tag}"),
                ));
            }
            put_tag(&mut buf, tag);
            buf.extend_from_slice(&len.to_le_bytes());
            if len == UNDEFINED_LEN {
                self.copy_item_elements(&mut buf, implicit)?;
            } else {
                self.copy_n(&mut buf, len as u64)?;
            }
        }
    }

    /// Raw-copy one undefined-length item's elements, through the item
    /// delimitation tag.
    fn copy_item_elements(&mut self, buf: &mut Vec<u8>, implicit: bool) -> Result<()> {
        loop {
            let tag = self.read_tag()?;
            if tag == ITEM_DELIM {
                let len = self.read_u32()?;
                put_tag(buf, tag);
                buf.extend_from_slice(&len.to_le_bytes());
                return Ok(());
            }
            self.copy_element_body(buf, tag, implicit)?;
        }
    }

    /// Raw-copy one element (tag already read) preserving its encoding.
    fn copy_element_body(&mut self, buf: &mut Vec<u8>, tag: Tag, implicit: bool) -> Result<()> {
        put_tag(buf, tag);
        if implicit {
            let len = self.read_u32()?;
            buf.extend_from_slice(&len.to_le_bytes());
            if len == UNDEFINED_LEN {
                let inner = self.read_undefined_value(implicit)?;
                buf.extend_from_slice(&inner);
                put_tag(buf, SEQ_DELIM);
                buf.extend_from_slice(&0u32.to_le_bytes());
            } else {
                self.copy_n(buf, len as u64)?;
            }
        } else {
            let mut vr_bytes = [0u8; 2];
            self.read_exact(&mut vr_bytes)?;
            let vr = Vr::from_bytes(vr_bytes).ok_or_else(|| {
                DicomError::parse(self.offset - 2, format!("unknown VR inside item for {tag}"))
            })?;
            buf.extend_from_slice(&vr_bytes);
            if vr.has_long_length() {
                let mut reserved = [0u8; 2];
                self.read_exact(&mut reserved)?;
                buf.extend_from_slice(&reserved);
                let len = self.read_u32()?;
                buf.extend_from_slice(&len.to_le_bytes());
                if len == UNDEFINED_LEN {
                    let inner = self.read_undefined_value(implicit)?;
                    buf.extend_from_slice(&inner);
                    put_tag(buf, SEQ_DELIM);
                    buf.extend_from_slice(&0u32.to_le_bytes());
                } else {
                    self.copy_n(buf, len as u64)?;
                }
            } else {
                let len = self.read_u16()?;
                buf.extend_from_slice(&len.to_le_bytes());
                self.copy_n(buf, len as u64)?;
            }
        }
        Ok(())
    }

    fn copy_n(&mut self, buf: &mut Vec<u8>, n: u64) -> Result<()> {
        let start = buf.len();
        buf.resize(start + n as usize, 0);
        self.read_exact_slice(start, buf)?;
        Ok(())
    }

    fn read_exact_slice(&mut self, from: usize, buf: &mut [u8]) -> Result<()> {
        self.r.read_exact(&mut buf[from..])?;
        self.offset += (buf.len() - from) as u64;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        self.r.read_exact(buf)?;
        self.offset += buf.len() as u64;
        Ok(())
    }

    fn try_read_tag(&mut self) -> Result<Option<Tag>> {
        let mut b = [0u8; 4];
        let mut filled = 0;
        while filled < 4 {
            let n = self.r.read(&mut b[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(DicomError::parse(self.offset, "truncated element tag"));
            }
            filled += n;
        }
        self.offset += 4;
        Ok(Some(Tag::new(
            u16::from_le_bytes([b[0], b[1]]),
            u16::from_le_bytes([b[2], b[3]]),
        )))
    }

    fn read_tag(&mut self) -> Result<Tag> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(Tag::new(
            u16::from_le_bytes([b[0], b[1]]),
            u16::from_le_bytes([b[2], b[3]]),
        ))
    }

    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_exact(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_exact(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vr::Vr;
    use tempfile::TempDir;

    fn sample_dataset() -> AttributeSet {
        let mut ds = AttributeSet::new();
        ds.put_string(tags::SOP_CLASS_UID, Vr::Ui, "1.2.840.10008.5.1.4.1.1.2");
        ds.put_string(tags::SOP_INSTANCE_UID, Vr::Ui, "1.2.3.4.5");
        ds.put_string(tags::STUDY_DATE, Vr::Da, "20240115");
        ds.put_string(tags::MODALITY, Vr::Cs, "CT");
        ds.put_string(tags::PATIENT_NAME, Vr::Pn, "DOE^JANE");
        ds.put_string(tags::PATIENT_ID, Vr::Lo, "P123");
        ds.put_string(tags::STUDY_INSTANCE_UID, Vr::Ui, "1.2.3");
        ds.put_string(tags::SERIES_INSTANCE_UID, Vr::Ui, "1.2.3.1");
        ds.insert(Attribute {
            tag: tags::PIXEL_DATA,
            vr: Vr::Ow,
            value: AttributeValue::Bytes(vec![0xAB; 512]),
        });
        ds
    }

    fn write_sample(dir: &TempDir, name: &str, ts: &str) -> std::path::PathBuf {
        let ds = sample_dataset();
        let meta = FileMeta::for_dataset(&ds, ts);
        let path = dir.path().join(name);
        write_file(&path, &meta, &ds).unwrap();
        path
    }

    #[test]
    fn explicit_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, "a.dcm", syntax::EXPLICIT_VR_LE);
        let file = read_file(&path).unwrap();
        assert_eq!(file.meta.transfer_syntax_uid, syntax::EXPLICIT_VR_LE);
        assert_eq!(file.meta.media_storage_sop_instance_uid, "1.2.3.4.5");
        assert_eq!(file.dataset, sample_dataset());
    }

    #[test]
    fn implicit_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, "b.dcm", syntax::IMPLICIT_VR_LE);
        let file = read_file(&path).unwrap();
        assert_eq!(file.dataset.string(tags::PATIENT_NAME), Some("DOE^JANE"));
        assert_eq!(file.dataset.string(tags::STUDY_DATE), Some("20240115"));
        assert_eq!(
            file.dataset.get(tags::PIXEL_DATA).unwrap().value,
            AttributeValue::Bytes(vec![0xAB; 512])
        );
    }

    #[test]
    fn header_read_stops_before_pixel_data() {
        let dir = TempDir::new().unwrap();
        let path = write_sample(&dir, "c.dcm", syntax::EXPLICIT_VR_LE);
        let readout = read_header(&path).unwrap();
        assert!(!readout.header.contains(tags::PIXEL_DATA));
        assert_eq!(readout.header.patient_id(), Some("P123"));

        let offset = readout.pixel_data_offset.unwrap();
        let bytes = std::fs::read(&path).unwrap();
        // The recorded offset points at the PixelData element's tag bytes.
        assert_eq!(&bytes[offset as usize..offset as usize + 4], &[0xE0, 0x7F, 0x10, 0x00]);
        assert_eq!(readout.file_len, bytes.len() as u64);
    }

    #[test]
    fn header_read_without_pixel_data() {
        let dir = TempDir::new().unwrap();
        let mut ds = sample_dataset();
        ds.remove(tags::PIXEL_DATA);
        let meta = FileMeta::for_dataset(&ds, syntax::EXPLICIT_VR_LE);
        let path = dir.path().join("d.dcm");
        write_file(&path, &meta, &ds).unwrap();
        let readout = read_header(&path).unwrap();
        assert!(readout.pixel_data_offset.is_none());
        assert_eq!(readout.header.sop_uid(), Some("1.2.3.4.5"));
    }

    #[test]
    fn undefined_length_sequence_round_trips() {
        let dir = TempDir::new().unwrap();
        let mut ds = sample_dataset();
        ds.remove(tags::PIXEL_DATA);
        // One defined-length item of 4 bytes.
        let mut span = Vec::new();
        put_tag(&mut span, ITEM);
        span.extend_from_slice(&4u32.to_le_bytes());
        span.extend_from_slice(&[1, 2, 3, 4]);
        ds.insert(Attribute {
            tag: Tag::new(0x0008, 0x1140),
            vr: Vr::Sq,
            value: AttributeValue::Undefined(span.clone()),
        });

        let meta = FileMeta::for_dataset(&ds, syntax::EXPLICIT_VR_LE);
        let path = dir.path().join("e.dcm");
        write_file(&path, &meta, &ds).unwrap();
        let file = read_file(&path).unwrap();
        assert_eq!(
            file.dataset.get(Tag::new(0x0008, 0x1140)).unwrap().value,
            AttributeValue::Undefined(span)
        );
    }

    #[test]
    fn rejects_non_dicom() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("junk.dcm");
        std::fs::write(&path, vec![0u8; 200]).unwrap();
        assert!(matches!(read_file(&path), Err(DicomError::NotDicom(_))));
    }

    #[test]
    fn group_length_elements_are_dropped() {
        let dir = TempDir::new().unwrap();
        let mut ds = sample_dataset();
        ds.remove(tags::PIXEL_DATA);
        ds.insert(Attribute {
            tag: Tag::new(0x0008, 0x0000),
            vr: Vr::Ul,
            value: AttributeValue::Bytes(42u32.to_le_bytes().to_vec()),
        });
        let meta = FileMeta::for_dataset(&ds, syntax::EXPLICIT_VR_LE);
        let path = dir.path().join("f.dcm");
        write_file(&path, &meta, &ds).unwrap();
        let file = read_file(&path).unwrap();
        assert!(!file.dataset.contains(Tag::new(0x0008, 0x0000)));
    }
}
