mod catalog;
mod error;

pub use catalog::{AttrDesc, Catalog, RelationDesc};
pub use error::{QueryError, QueryResult};

use std::fs;
use std::path::{Path, PathBuf};

use crate::buffer::BufferManager;
use crate::file::PagedFileManager;
use crate::heap::{AttrType, CompOp, HeapFile, HeapFileScan, InsertScan, Rid, ScanFilter};

/// A typed attribute value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i32),
    Float(f32),
    Str(String),
}

impl Value {
    pub fn attr_type(&self) -> AttrType {
        match self {
            Value::Int(_) => AttrType::Int,
            Value::Float(_) => AttrType::Float,
            Value::Str(_) => AttrType::Str,
        }
    }

    /// Encode into the fixed-width on-disk form of an attribute
    fn encode(&self, attr: &AttrDesc) -> QueryResult<Vec<u8>> {
        match self {
            Value::Int(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Float(v) => Ok(v.to_le_bytes().to_vec()),
            Value::Str(s) => {
                let bytes = s.as_bytes();
                if bytes.len() > attr.len {
                    return Err(QueryError::ValueTooLong {
                        attr: attr.name.clone(),
                        max: attr.len,
                    });
                }
                let mut out = vec![0u8; attr.len];
                out[..bytes.len()].copy_from_slice(bytes);
                Ok(out)
            }
        }
    }

    /// Decode the fixed-width on-disk form of an attribute
    fn decode(bytes: &[u8], attr_type: AttrType) -> Value {
        match attr_type {
            AttrType::Int => Value::Int(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            AttrType::Float => Value::Float(f32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ])),
            AttrType::Str => {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                Value::Str(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
        }
    }
}

/// A comparison of one named attribute against a constant
#[derive(Debug, Clone)]
pub struct Predicate {
    pub attr: String,
    pub op: CompOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(attr: &str, op: CompOp, value: Value) -> Self {
        Self {
            attr: attr.to_string(),
            op,
            value,
        }
    }
}

/// Execution context owning the buffer pool and the catalog.
///
/// Relations live as heap files under one directory, described by the
/// catalog persisted alongside them.
pub struct Database {
    dir: PathBuf,
    buf: BufferManager,
    catalog: Catalog,
}

impl Database {
    /// Open (or initialize) a database directory
    pub fn open<P: AsRef<Path>>(dir: P) -> QueryResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let catalog = if Catalog::exists(&dir) {
            Catalog::load(&dir)?
        } else {
            Catalog::new()
        };

        Ok(Self {
            dir,
            buf: BufferManager::new(PagedFileManager::new()),
            catalog,
        })
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    fn table_path(&self, rel: &str) -> PathBuf {
        self.dir.join(format!("{rel}.tbl"))
    }

    /// Create a relation and its backing heap file.
    ///
    /// `attrs` gives name, type, and byte width per attribute; width must be
    /// 4 for `Int`/`Float`.
    pub fn create_relation(
        &mut self,
        name: &str,
        attrs: &[(&str, AttrType, usize)],
    ) -> QueryResult<()> {
        if self.catalog.contains(name) {
            return Err(QueryError::RelationExists(name.to_string()));
        }
        let desc = RelationDesc::new(name, attrs)?;

        let path = self.table_path(name);
        HeapFile::create(&mut self.buf, &path)?;
        self.catalog.add_relation(desc);
        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// Remove a relation, its records, and its catalog entry
    pub fn drop_relation(&mut self, name: &str) -> QueryResult<()> {
        self.catalog.relation(name)?;
        let path = self.table_path(name);
        HeapFile::destroy(&mut self.buf, &path)?;
        self.catalog.remove_relation(name)?;
        self.catalog.save(&self.dir)?;
        Ok(())
    }

    /// Insert one record given as (attribute name, value) pairs.
    ///
    /// The supplied list must match the relation schema by count, name, and
    /// type; attributes may come in any order.
    pub fn insert(&mut self, rel: &str, values: &[(&str, Value)]) -> QueryResult<Rid> {
        let desc = self.catalog.relation(rel)?.clone();

        if values.len() != desc.attrs.len() {
            return Err(QueryError::AttrCountMismatch {
                rel: rel.to_string(),
                expected: desc.attrs.len(),
                actual: values.len(),
            });
        }

        let mut record = vec![0u8; desc.rec_len];
        for (attr_name, value) in values {
            let attr = desc.attr(attr_name).ok_or_else(|| QueryError::AttrNotFound {
                rel: rel.to_string(),
                attr: attr_name.to_string(),
            })?;
            if value.attr_type() != attr.attr_type {
                return Err(QueryError::AttrTypeMismatch {
                    rel: rel.to_string(),
                    attr: attr_name.to_string(),
                });
            }
            let bytes = value.encode(attr)?;
            record[attr.offset..attr.offset + attr.len].copy_from_slice(&bytes);
        }

        let path = self.table_path(rel);
        let mut scan = InsertScan::open(&mut self.buf, &path)?;
        let result = scan.insert_record(&mut self.buf, &record);
        scan.close(&mut self.buf);
        Ok(result?)
    }

    /// Delete the records matching the predicate; `None` deletes every
    /// record. Returns how many were deleted.
    pub fn delete(&mut self, rel: &str, pred: Option<&Predicate>) -> QueryResult<usize> {
        let desc = self.catalog.relation(rel)?.clone();
        let filter = pred.map(|p| Self::build_filter(&desc, p)).transpose()?;

        let path = self.table_path(rel);
        let mut scan = HeapFileScan::open(&mut self.buf, &path)?;
        scan.start_scan(filter);
        let result = Self::delete_matching(&mut self.buf, &mut scan);
        scan.close(&mut self.buf);
        result
    }

    /// Project the chosen attributes of every matching source record into
    /// the result relation. Returns how many records were copied.
    ///
    /// The result relation must already exist with attributes matching the
    /// projection in count, type, and width. The predicate is handed to the
    /// scan unchanged; the scan engine filters on all six operators.
    pub fn select(
        &mut self,
        result_rel: &str,
        src_rel: &str,
        projections: &[&str],
        pred: Option<&Predicate>,
    ) -> QueryResult<usize> {
        let src = self.catalog.relation(src_rel)?.clone();
        let dst = self.catalog.relation(result_rel)?.clone();

        let mut proj_attrs = Vec::with_capacity(projections.len());
        for name in projections {
            let attr = src.attr(name).ok_or_else(|| QueryError::AttrNotFound {
                rel: src_rel.to_string(),
                attr: name.to_string(),
            })?;
            proj_attrs.push(attr.clone());
        }

        if dst.attrs.len() != proj_attrs.len() {
            return Err(QueryError::AttrCountMismatch {
                rel: result_rel.to_string(),
                expected: proj_attrs.len(),
                actual: dst.attrs.len(),
            });
        }
        for (dst_attr, src_attr) in dst.attrs.iter().zip(&proj_attrs) {
            if dst_attr.attr_type != src_attr.attr_type || dst_attr.len != src_attr.len {
                return Err(QueryError::AttrTypeMismatch {
                    rel: result_rel.to_string(),
                    attr: dst_attr.name.clone(),
                });
            }
        }

        let filter = pred.map(|p| Self::build_filter(&src, p)).transpose()?;
        let src_path = self.table_path(src_rel);
        let dst_path = self.table_path(result_rel);

        let mut scan = HeapFileScan::open(&mut self.buf, &src_path)?;
        scan.start_scan(filter);
        let mut insert = match InsertScan::open(&mut self.buf, &dst_path) {
            Ok(insert) => insert,
            Err(err) => {
                scan.close(&mut self.buf);
                return Err(err.into());
            }
        };

        let result = Self::project_matching(&mut self.buf, &mut scan, &mut insert, &proj_attrs);
        insert.close(&mut self.buf);
        scan.close(&mut self.buf);
        result
    }

    /// Scan a whole relation, decoding each record through its schema
    pub fn scan_all(&mut self, rel: &str) -> QueryResult<Vec<(Rid, Vec<Value>)>> {
        let desc = self.catalog.relation(rel)?.clone();

        let path = self.table_path(rel);
        let mut scan = HeapFileScan::open(&mut self.buf, &path)?;
        let result = Self::decode_matching(&mut self.buf, &mut scan, &desc);
        scan.close(&mut self.buf);
        result
    }

    fn build_filter(desc: &RelationDesc, pred: &Predicate) -> QueryResult<ScanFilter> {
        let attr = desc.attr(&pred.attr).ok_or_else(|| QueryError::AttrNotFound {
            rel: desc.name.clone(),
            attr: pred.attr.clone(),
        })?;
        if pred.value.attr_type() != attr.attr_type {
            return Err(QueryError::AttrTypeMismatch {
                rel: desc.name.clone(),
                attr: pred.attr.clone(),
            });
        }
        let value = pred.value.encode(attr)?;
        Ok(ScanFilter::new(
            attr.offset,
            attr.len,
            attr.attr_type,
            pred.op,
            value,
        )?)
    }

    fn delete_matching(buf: &mut BufferManager, scan: &mut HeapFileScan) -> QueryResult<usize> {
        let mut deleted = 0;
        while scan.scan_next(buf)?.is_some() {
            scan.delete_record(buf)?;
            deleted += 1;
        }
        Ok(deleted)
    }

    fn project_matching(
        buf: &mut BufferManager,
        scan: &mut HeapFileScan,
        insert: &mut InsertScan,
        attrs: &[AttrDesc],
    ) -> QueryResult<usize> {
        let out_len: usize = attrs.iter().map(|a| a.len).sum();
        let mut copied = 0;

        while scan.scan_next(buf)?.is_some() {
            let mut out = Vec::with_capacity(out_len);
            {
                let record = scan.get_record(buf)?;
                for attr in attrs {
                    let field = record
                        .get(attr.offset..attr.offset + attr.len)
                        .ok_or_else(|| {
                            crate::heap::HeapError::CorruptPage(format!(
                                "record too short for attribute {}",
                                attr.name
                            ))
                        })?;
                    out.extend_from_slice(field);
                }
            }
            insert.insert_record(buf, &out)?;
            copied += 1;
        }
        Ok(copied)
    }

    fn decode_matching(
        buf: &mut BufferManager,
        scan: &mut HeapFileScan,
        desc: &RelationDesc,
    ) -> QueryResult<Vec<(Rid, Vec<Value>)>> {
        let mut rows = Vec::new();
        while let Some(rid) = scan.scan_next(buf)? {
            let record = scan.get_record(buf)?;
            let mut values = Vec::with_capacity(desc.attrs.len());
            for attr in &desc.attrs {
                let field = record
                    .get(attr.offset..attr.offset + attr.len)
                    .ok_or_else(|| {
                        crate::heap::HeapError::CorruptPage(format!(
                            "record too short for attribute {}",
                            attr.name
                        ))
                    })?;
                values.push(Value::decode(field, attr.attr_type));
            }
            rows.push((rid, values));
        }
        Ok(rows)
    }
}
