use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use super::error::{QueryError, QueryResult};
use crate::heap::{AttrType, MAX_RECORD_SIZE};

/// One attribute of a relation: its type and the byte range it occupies
/// within every record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrDesc {
    pub name: String,
    pub attr_type: AttrType,
    pub offset: usize,
    pub len: usize,
}

/// Schema of one relation with fixed-width attribute encoding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelationDesc {
    pub name: String,
    pub attrs: Vec<AttrDesc>,
    pub rec_len: usize,
}

impl RelationDesc {
    /// Build a relation description, assigning attribute offsets in
    /// declaration order. `len` is the byte width of a `Str` attribute and
    /// must be 4 for `Int` and `Float`.
    pub fn new(name: &str, attrs: &[(&str, AttrType, usize)]) -> QueryResult<Self> {
        if attrs.is_empty() {
            return Err(QueryError::InvalidAttr(format!(
                "relation {name} declares no attributes"
            )));
        }

        let mut descs = Vec::with_capacity(attrs.len());
        let mut offset = 0;
        for &(attr_name, attr_type, len) in attrs {
            match attr_type {
                AttrType::Int | AttrType::Float if len != 4 => {
                    return Err(QueryError::InvalidAttr(format!(
                        "attribute {attr_name} of type {attr_type:?} must be 4 bytes, got {len}"
                    )));
                }
                AttrType::Str if len == 0 => {
                    return Err(QueryError::InvalidAttr(format!(
                        "attribute {attr_name} must be at least 1 byte"
                    )));
                }
                _ => {}
            }
            if descs.iter().any(|d: &AttrDesc| d.name == attr_name) {
                return Err(QueryError::InvalidAttr(format!(
                    "duplicate attribute {attr_name} in relation {name}"
                )));
            }

            descs.push(AttrDesc {
                name: attr_name.to_string(),
                attr_type,
                offset,
                len,
            });
            offset += len;
        }

        if offset > MAX_RECORD_SIZE {
            return Err(QueryError::InvalidAttr(format!(
                "records of relation {name} would be {offset} bytes, larger than a page"
            )));
        }

        Ok(Self {
            name: name.to_string(),
            attrs: descs,
            rec_len: offset,
        })
    }

    /// Find an attribute by name
    pub fn attr(&self, name: &str) -> Option<&AttrDesc> {
        self.attrs.iter().find(|a| a.name == name)
    }
}

/// The relation catalog, persisted as JSON next to the table files
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Catalog {
    relations: HashMap<String, RelationDesc>,
}

impl Catalog {
    const FILE_NAME: &'static str = "catalog.json";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(dir: &Path) -> QueryResult<Self> {
        let content = fs::read_to_string(dir.join(Self::FILE_NAME))?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn exists(dir: &Path) -> bool {
        dir.join(Self::FILE_NAME).exists()
    }

    pub fn save(&self, dir: &Path) -> QueryResult<()> {
        let content = serde_json::to_string_pretty(&self)?;
        fs::write(dir.join(Self::FILE_NAME), content)?;
        Ok(())
    }

    pub fn add_relation(&mut self, desc: RelationDesc) {
        self.relations.insert(desc.name.clone(), desc);
    }

    pub fn remove_relation(&mut self, name: &str) -> QueryResult<RelationDesc> {
        self.relations
            .remove(name)
            .ok_or_else(|| QueryError::RelationNotFound(name.to_string()))
    }

    pub fn relation(&self, name: &str) -> QueryResult<&RelationDesc> {
        self.relations
            .get(name)
            .ok_or_else(|| QueryError::RelationNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.relations.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_desc() -> RelationDesc {
        RelationDesc::new(
            "emp",
            &[
                ("id", AttrType::Int, 4),
                ("name", AttrType::Str, 16),
                ("rate", AttrType::Float, 4),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_offsets_in_declaration_order() {
        let desc = sample_desc();
        assert_eq!(desc.rec_len, 24);
        assert_eq!(desc.attr("id").unwrap().offset, 0);
        assert_eq!(desc.attr("name").unwrap().offset, 4);
        assert_eq!(desc.attr("rate").unwrap().offset, 20);
        assert!(desc.attr("missing").is_none());
    }

    #[test]
    fn test_invalid_declarations() {
        assert!(matches!(
            RelationDesc::new("r", &[]),
            Err(QueryError::InvalidAttr(_))
        ));
        assert!(matches!(
            RelationDesc::new("r", &[("a", AttrType::Int, 8)]),
            Err(QueryError::InvalidAttr(_))
        ));
        assert!(matches!(
            RelationDesc::new("r", &[("a", AttrType::Str, 0)]),
            Err(QueryError::InvalidAttr(_))
        ));
        assert!(matches!(
            RelationDesc::new("r", &[("a", AttrType::Int, 4), ("a", AttrType::Int, 4)]),
            Err(QueryError::InvalidAttr(_))
        ));
    }

    #[test]
    fn test_catalog_round_trip() {
        let temp_dir = tempfile::tempdir().unwrap();

        let mut catalog = Catalog::new();
        catalog.add_relation(sample_desc());
        catalog.save(temp_dir.path()).unwrap();

        let restored = Catalog::load(temp_dir.path()).unwrap();
        let desc = restored.relation("emp").unwrap();
        assert_eq!(desc.rec_len, 24);
        assert_eq!(desc.attrs.len(), 3);
        assert_eq!(desc.attr("name").unwrap().len, 16);
    }

    #[test]
    fn test_remove_relation() {
        let mut catalog = Catalog::new();
        catalog.add_relation(sample_desc());

        catalog.remove_relation("emp").unwrap();
        assert!(matches!(
            catalog.relation("emp"),
            Err(QueryError::RelationNotFound(_))
        ));
        assert!(matches!(
            catalog.remove_relation("emp"),
            Err(QueryError::RelationNotFound(_))
        ));
    }
}
