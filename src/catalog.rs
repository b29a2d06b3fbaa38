//! The POI category catalog: human labels mapped to upstream numeric category codes.
//!
//! The default catalog mirrors the fifteen categories the reference deployment ships
//! with; operators can replace it wholesale via the `POI_TYPES` environment variable.

use indexmap::IndexMap;

/// `label:code|code;label2:code3` — labels map to one or more pipe-delimited upstream codes.
///
/// Entries are kept in declaration order, not sorted: that order is the canonical
/// resume sequence a job walks through, so an `IndexMap` is used instead of a
/// `BTreeMap`, which would alphabetize the labels and silently reorder resumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    entries: IndexMap<String, Vec<String>>,
}

/// The catalog shipped with the reference deployment, before any `POI_TYPES` override.
pub const DEFAULT_CATALOG: &str = "\
交通设施服务:150104|150200|150400|150500;\
风景名胜:110000|110200;\
住宿服务:100000|100100|100101|100102|100200|100201|100202;\
商务住宅:120000|120100|120200|120201|120300;\
生活服务:070000|070100|070200|070300|070400|070500|070600|070700|070800|070900|071000|071100|071200|071300;\
体育休闲:080000|080100|080101|080102|080103|080104|080105|080200|080300|080301|080302|080400|080500|080600|080601|080602|080603|080604|080605|080700;\
医疗保健:090000|090100|090200|090300|090400|090500|090600|090700|090701|090702|090800|090900|091000|091100|091200;\
餐饮服务:050000|050100|050200|050300|050400|050500|050600|050700|050800|050900|050901|050902|050903|050904;\
购物服务:060000|060100|060101|060102|060103|060104|060105|060200|060400|060700|060701|060702|060703|061000|061100|061200|061300|061400|061700|061800|062100|062400|062500|062600|062900;\
科教文化:140000|140100|140200|140300|140400|140401|140402|140500|140600|140700|140800|140900|141000|141200|141201|141202|141203|141204;\
公司企业:170000|170100|170200|170201|170202|170203|171000|171001|171002|171003|172000;\
金融保险:160000|160100|160200|160300|160400|160500|160600|160700|160800|160900|161000;\
政府机构:130000|130100|130200|130201|130300|130301|130400|130500|130600|130700;\
汽车服务:010000|010100|010200|010300|010400|010500|010600|010700|010900|011000|011100;\
汽车销售:020000|020100|020200|020300|020400|020500|020600\
";

impl Catalog {
    /// Parses the `label:code|code;label2:code3` syntax.
    pub fn parse(spec: &str) -> Result<Self, CatalogError> {
        let mut entries = IndexMap::new();
        for clause in spec.split(';').map(str::trim).filter(|c| !c.is_empty()) {
            let (label, codes) = clause
                .split_once(':')
                .ok_or_else(|| CatalogError::MalformedClause(clause.to_string()))?;
            let label = label.trim();
            if label.is_empty() {
                return Err(CatalogError::MalformedClause(clause.to_string()));
            }
            let codes: Vec<String> = codes
                .split('|')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string)
                .collect();
            if codes.is_empty() {
                return Err(CatalogError::NoCodes(label.to_string()));
            }
            entries.insert(label.to_string(), codes);
        }
        if entries.is_empty() {
            return Err(CatalogError::Empty);
        }
        Ok(Self { entries })
    }

    pub fn default_catalog() -> Self {
        Self::parse(DEFAULT_CATALOG).expect("default catalog is well-formed")
    }

    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn codes(&self, label: &str) -> Option<&[String]> {
        self.entries.get(label).map(Vec::as_slice)
    }

    /// All category codes for `label`, joined with `|`, as the upstream API expects.
    pub fn upstream_param(&self, label: &str) -> Option<String> {
        self.codes(label).map(|codes| codes.join("|"))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog clause missing ':' separator: {0:?}")]
    MalformedClause(String),
    #[error("category {0:?} has no codes")]
    NoCodes(String),
    #[error("catalog is empty")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_entry() {
        let catalog = Catalog::parse("风景名胜:110000|110200").unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.upstream_param("风景名胜").unwrap(), "110000|110200");
    }

    #[test]
    fn parses_multiple_entries() {
        let catalog = Catalog::parse("a:1|2;b:3").unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.upstream_param("a").unwrap(), "1|2");
        assert_eq!(catalog.upstream_param("b").unwrap(), "3");
    }

    #[test]
    fn rejects_missing_separator() {
        assert!(matches!(
            Catalog::parse("nosep"),
            Err(CatalogError::MalformedClause(_))
        ));
    }

    #[test]
    fn rejects_empty_codes() {
        assert!(matches!(
            Catalog::parse("label:"),
            Err(CatalogError::NoCodes(_))
        ));
    }

    #[test]
    fn default_catalog_has_fifteen_categories() {
        let catalog = Catalog::default_catalog();
        assert_eq!(catalog.len(), 15);
    }

    #[test]
    fn unknown_label_returns_none() {
        let catalog = Catalog::default_catalog();
        assert!(catalog.codes("not a real category").is_none());
    }
}
