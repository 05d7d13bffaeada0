//! Feature schema and byte-coded feature vectors.
//!
//! Every segment is described by one fixed-width vector of byte codes, one
//! per schema feature. The schema names each feature and enumerates its
//! value domain; code `k` of a feature means its `k`-th value string.
//!
//! Names are resolved to indices once ([`FeatureSchema::feature_index`]),
//! after which vectors are accessed by plain index.
//!
//! File layout:
//! ```text
//! [4B "UFEA"] [4B version=1] [4B num_features]
//! per feature: [2B name_len] [name] [2B num_values] per value: [2B len] [utf8]
//! [4B num_vectors] num_vectors x num_features bytes
//! ```

use std::{
    collections::HashMap,
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

use tracing::debug;

use crate::binio::{read_bytes, read_preamble, read_string, read_u16, read_u32, write_preamble, write_string};
use crate::error::{Error, Result};

const MAGIC: &[u8; 4] = b"UFEA";

// ─────────────────────────────────────────────────────────────────────────────
// Schema
// ─────────────────────────────────────────────────────────────────────────────

/// One named feature and its value domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDef {
    pub name: String,
    pub values: Vec<String>,
}

/// Immutable description of a database's features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSchema {
    features: Vec<FeatureDef>,
    by_name: HashMap<String, usize>,
    value_codes: Vec<HashMap<String, u8>>,
}

impl FeatureSchema {
    pub fn new(features: Vec<FeatureDef>) -> Result<Self> {
        let mut by_name = HashMap::with_capacity(features.len());
        let mut value_codes = Vec::with_capacity(features.len());
        for (i, f) in features.iter().enumerate() {
            if by_name.insert(f.name.clone(), i).is_some() {
                return Err(Error::InvalidState(format!("duplicate feature '{}'", f.name)));
            }
            if f.values.is_empty() || f.values.len() > 256 {
                return Err(Error::InvalidState(format!(
                    "feature '{}' has {} values; byte features need 1..=256",
                    f.name,
                    f.values.len()
                )));
            }
            let mut codes = HashMap::with_capacity(f.values.len());
            for (code, v) in f.values.iter().enumerate() {
                if codes.insert(v.clone(), code as u8).is_some() {
                    return Err(Error::InvalidState(format!(
                        "feature '{}' lists value '{}' twice",
                        f.name, v
                    )));
                }
            }
            value_codes.push(codes);
        }
        Ok(Self { features, by_name, value_codes })
    }

    /// Number of features, i.e. the width of every vector.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn features(&self) -> &[FeatureDef] {
        &self.features
    }

    pub fn feature_index(&self, name: &str) -> Result<usize> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownFeature(format!("'{name}' is not in the schema")))
    }

    pub fn feature_name(&self, index: usize) -> Option<&str> {
        self.features.get(index).map(|f| f.name.as_str())
    }

    /// Number of values in the domain of `name`.
    pub fn num_values(&self, name: &str) -> Result<usize> {
        Ok(self.features[self.feature_index(name)?].values.len())
    }

    /// Byte code stored for `value` of feature `name`.
    pub fn decode(&self, name: &str, value: &str) -> Result<u8> {
        let i = self.feature_index(name)?;
        self.value_codes[i]
            .get(value)
            .copied()
            .ok_or_else(|| Error::UnknownFeature(format!("'{name}' has no value '{value}'")))
    }

    /// Value string for byte `code` of feature `name`. Inverse of [`decode`](Self::decode).
    pub fn encode(&self, name: &str, code: u8) -> Result<&str> {
        let i = self.feature_index(name)?;
        self.value_at(i, code)
    }

    pub(crate) fn value_at(&self, index: usize, code: u8) -> Result<&str> {
        let f = &self.features[index];
        f.values
            .get(code as usize)
            .map(String::as_str)
            .ok_or_else(|| Error::UnknownFeature(format!("'{}' has no code {code}", f.name)))
    }

    /// Build a vector from `(feature, value)` pairs; unnamed features get code 0.
    pub fn vector_from_values(&self, unit_id: u32, values: &[(&str, &str)]) -> Result<FeatureVector> {
        let mut codes = vec![0u8; self.len()];
        for &(name, value) in values {
            codes[self.feature_index(name)?] = self.decode(name, value)?;
        }
        Ok(FeatureVector::new(unit_id, codes))
    }

    /// Check a vector's width and that every code is inside its domain.
    pub fn check(&self, v: &FeatureVector) -> Result<()> {
        if v.len() != self.len() {
            return Err(Error::UnknownFeature(format!(
                "vector for unit {} has {} features, schema has {}",
                v.unit_id(),
                v.len(),
                self.len()
            )));
        }
        for (i, &code) in v.codes().iter().enumerate() {
            self.value_at(i, code)?;
        }
        Ok(())
    }

    fn read_from<R: std::io::Read>(r: &mut R) -> Result<Self> {
        let n = read_u32(r, "feature schema")?;
        let mut features = Vec::with_capacity((n as usize).min(4096));
        for _ in 0..n {
            let name = read_string(r, "feature name")?;
            let num_values = read_u16(r, "feature schema")?;
            let mut values = Vec::with_capacity(num_values as usize);
            for _ in 0..num_values {
                values.push(read_string(r, "feature value")?);
            }
            features.push(FeatureDef { name, values });
        }
        Self::new(features).map_err(|e| match e {
            Error::InvalidState(msg) => Error::corrupt(format!("feature schema: {msg}")),
            other => other,
        })
    }

    fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        w.write_all(&(self.features.len() as u32).to_le_bytes())?;
        for f in &self.features {
            write_string(w, &f.name)?;
            w.write_all(&(f.values.len() as u16).to_le_bytes())?;
            for v in &f.values {
                write_string(w, v)?;
            }
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Vectors
// ─────────────────────────────────────────────────────────────────────────────

/// Byte codes describing one segment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FeatureVector {
    unit_id: u32,
    codes: Box<[u8]>,
}

impl FeatureVector {
    pub fn new(unit_id: u32, codes: impl Into<Box<[u8]>>) -> Self {
        Self { unit_id, codes: codes.into() }
    }

    pub fn unit_id(&self) -> u32 {
        self.unit_id
    }

    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub fn get(&self, index: usize) -> u8 {
        self.codes[index]
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Feature file
// ─────────────────────────────────────────────────────────────────────────────

/// Schema plus one vector per segment id, in id order.
#[derive(Debug, Clone)]
pub struct FeatureFile {
    pub schema: FeatureSchema,
    pub vectors: Vec<FeatureVector>,
}

impl FeatureFile {
    pub fn open(path: &Path) -> Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        read_preamble(&mut r, MAGIC, "feature file header")?;
        let schema = FeatureSchema::read_from(&mut r)?;
        let count = read_u32(&mut r, "feature file header")?;

        let mut vectors = Vec::with_capacity((count as usize).min(1 << 20));
        for id in 0..count {
            let v = FeatureVector::new(id, read_bytes(&mut r, schema.len(), "feature vector")?);
            schema.check(&v).map_err(|e| Error::corrupt(format!("feature file: {e}")))?;
            vectors.push(v);
        }

        debug!(path = %path.display(), features = schema.len(), vectors = count, "feature file opened");
        Ok(Self { schema, vectors })
    }

    /// Write schema and vectors. Vector `i` must describe unit `i`.
    pub fn write(&self, path: &Path) -> Result<()> {
        for (i, v) in self.vectors.iter().enumerate() {
            if v.unit_id() as usize != i {
                return Err(Error::InvalidState(format!(
                    "vector at position {i} describes unit {}",
                    v.unit_id()
                )));
            }
            self.schema.check(v)?;
        }
        let mut w = BufWriter::new(File::create(path)?);
        write_preamble(&mut w, MAGIC)?;
        self.schema.write_to(&mut w)?;
        w.write_all(&(self.vectors.len() as u32).to_le_bytes())?;
        for v in &self.vectors {
            w.write_all(v.codes())?;
        }
        w.flush()?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn def(name: &str, values: &[&str]) -> FeatureDef {
        FeatureDef { name: name.into(), values: values.iter().map(|s| s.to_string()).collect() }
    }

    fn schema() -> FeatureSchema {
        FeatureSchema::new(vec![
            def("phone", &["0", "a", "e", "t", "s"]),
            def("stressed", &["0", "1"]),
            def("pos_in_syl", &["0", "onset", "nucleus", "coda"]),
        ])
        .unwrap()
    }

    #[test]
    fn test_decode_encode() {
        let s = schema();
        assert_eq!(s.decode("phone", "t").unwrap(), 3);
        assert_eq!(s.encode("phone", 3).unwrap(), "t");
        assert_eq!(s.encode("pos_in_syl", 2).unwrap(), "nucleus");
        assert_eq!(s.num_values("stressed").unwrap(), 2);
    }

    #[test]
    fn test_unknown_feature() {
        let s = schema();
        assert!(matches!(s.decode("tone", "H"), Err(Error::UnknownFeature(_))));
        assert!(matches!(s.encode("tone", 0), Err(Error::UnknownFeature(_))));
        assert!(matches!(s.decode("phone", "zh"), Err(Error::UnknownFeature(_))));
        assert!(matches!(s.encode("stressed", 2), Err(Error::UnknownFeature(_))));
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let r = FeatureSchema::new(vec![def("a", &["0"]), def("a", &["0"])]);
        assert!(r.is_err());
    }

    #[test]
    fn test_vector_from_values() {
        let s = schema();
        let v = s.vector_from_values(4, &[("phone", "s"), ("pos_in_syl", "coda")]).unwrap();
        assert_eq!(v.unit_id(), 4);
        assert_eq!(v.codes(), &[4, 0, 3]);
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.bin");
        let s = schema();
        let vectors = vec![
            FeatureVector::new(0, vec![1, 0, 1]),
            FeatureVector::new(1, vec![2, 1, 2]),
            FeatureVector::new(2, vec![3, 0, 3]),
        ];
        FeatureFile { schema: s.clone(), vectors: vectors.clone() }.write(&path).unwrap();

        let back = FeatureFile::open(&path).unwrap();
        assert_eq!(back.schema, s);
        assert_eq!(back.vectors, vectors);
    }

    #[test]
    fn test_out_of_domain_code_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("features.bin");
        FeatureFile { schema: schema(), vectors: vec![FeatureVector::new(0, vec![1, 0, 1])] }
            .write(&path)
            .unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] = 9;
        std::fs::write(&path, bytes).unwrap();
        assert!(matches!(FeatureFile::open(&path), Err(Error::CorruptDatabase(_))));
    }

    #[test]
    fn test_width_mismatch() {
        let s = schema();
        let v = FeatureVector::new(0, vec![1, 0]);
        assert!(matches!(s.check(&v), Err(Error::UnknownFeature(_))));
    }
}
