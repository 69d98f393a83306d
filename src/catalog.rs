//! Item catalogs: descriptive rows keyed by global item id.
use std::fs::File;
use std::io::Read;
use std::ops::Range;
use std::path::Path;

use crate::data::{IdDiff, ITEM_COLUMN};
use crate::{FieldId, RawId};

/// Catalog error types.
#[derive(Debug, Fail)]
pub enum CatalogError {
    /// The file is not valid delimited text.
    #[fail(display = "Cannot read catalog: {}", _0)]
    Csv(#[cause] csv::Error),
    /// The file cannot be opened.
    #[fail(display = "Cannot open catalog: {}", _0)]
    Io(#[cause] std::io::Error),
    /// The id column is absent from the header.
    #[fail(display = "Catalog has no {:?} column.", name)]
    MissingColumn {
        /// Name of the id column.
        name: String,
    },
    /// An item id is not a non-negative integer.
    #[fail(display = "Invalid item id {:?} on line {}.", value, line)]
    InvalidId {
        /// One-based line number.
        line: u64,
        /// The id as it was read.
        value: String,
    },
}

impl From<csv::Error> for CatalogError {
    fn from(error: csv::Error) -> Self {
        CatalogError::Csv(error)
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(error: std::io::Error) -> Self {
        CatalogError::Io(error)
    }
}

/// How to read a catalog file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogOptions {
    delimiter: u8,
    id_column: String,
    columns: Option<Vec<String>>,
}

impl Default for CatalogOptions {
    fn default() -> Self {
        CatalogOptions {
            delimiter: b',',
            id_column: "id".to_owned(),
            columns: None,
        }
    }
}

impl CatalogOptions {
    /// Field delimiter of the catalog file.
    pub fn delimiter(mut self, delimiter: u8) -> Self {
        self.delimiter = delimiter;
        self
    }

    /// Name of the column holding raw item ids.
    pub fn id_column(mut self, id_column: &str) -> Self {
        self.id_column = id_column.to_owned();
        self
    }

    /// Column names for files without a header row.
    pub fn columns<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        self.columns = Some(columns.iter().map(|x| x.as_ref().to_owned()).collect());
        self
    }
}

/// One catalog row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    id: FieldId,
    values: Vec<String>,
}

impl CatalogItem {
    /// A row for global id `id`.
    pub fn new(id: FieldId, values: Vec<String>) -> Self {
        CatalogItem { id, values }
    }

    /// Global item id.
    pub fn id(&self) -> FieldId {
        self.id
    }

    /// Descriptive values, in catalog column order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Value of `column`, if the row has one.
    pub fn value(&self, column: usize) -> Option<&str> {
        self.values.get(column).map(String::as_str)
    }
}

/// Named columns of descriptive values for each item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    columns: Vec<String>,
    items: Vec<CatalogItem>,
}

impl Catalog {
    /// A catalog over `columns` holding `items`.
    pub fn new(columns: Vec<String>, items: Vec<CatalogItem>) -> Self {
        Catalog { columns, items }
    }

    /// A catalog listing bare ids, for models trained without item metadata.
    pub fn from_ids(ids: Range<FieldId>) -> Self {
        Catalog {
            columns: vec!["id".to_owned()],
            items: ids.map(|id| CatalogItem::new(id, vec![id.to_string()])).collect(),
        }
    }

    /// Read a delimited catalog file, shifting raw ids by the item offset of
    /// `id_diff`.
    pub fn from_path<P: AsRef<Path>>(
        path: P,
        options: &CatalogOptions,
        id_diff: &IdDiff,
    ) -> Result<Self, CatalogError> {
        let catalog = Self::from_reader(File::open(path.as_ref())?, options, id_diff)?;

        debug!(
            path = %path.as_ref().display(),
            items = catalog.len(),
            columns = catalog.columns.len(),
            "read catalog"
        );

        Ok(catalog)
    }

    /// Like [`Catalog::from_path`], reading from any reader.
    pub fn from_reader<R: Read>(
        reader: R,
        options: &CatalogOptions,
        id_diff: &IdDiff,
    ) -> Result<Self, CatalogError> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(options.delimiter)
            .has_headers(options.columns.is_none())
            .flexible(true)
            .from_reader(reader);

        let header: Vec<String> = match options.columns {
            Some(ref columns) => columns.clone(),
            None => reader
                .byte_headers()?
                .iter()
                .map(|x| String::from_utf8_lossy(x).trim().to_owned())
                .collect(),
        };

        let id_idx = header
            .iter()
            .position(|name| *name == options.id_column)
            .ok_or_else(|| CatalogError::MissingColumn {
                name: options.id_column.clone(),
            })?;

        let offset = id_diff.offset(ITEM_COLUMN) as RawId;
        let mut items = Vec::new();

        for record in reader.byte_records() {
            let record = record?;
            let line = record.position().map_or(0, |position| position.line());
            let fields: Vec<String> = record
                .iter()
                .map(|x| String::from_utf8_lossy(x).trim().to_owned())
                .collect();

            if fields.iter().all(|x| x.is_empty()) {
                continue;
            }

            let raw = fields.get(id_idx).map(String::as_str).unwrap_or("");
            let id = raw
                .parse::<RawId>()
                .ok()
                .filter(|&id| id >= 0)
                .ok_or_else(|| CatalogError::InvalidId {
                    line,
                    value: raw.to_owned(),
                })?;

            let values = (0..header.len())
                .filter(|&idx| idx != id_idx)
                .map(|idx| fields.get(idx).cloned().unwrap_or_default())
                .collect();

            items.push(CatalogItem::new((id + offset) as FieldId, values));
        }

        let columns = header
            .into_iter()
            .enumerate()
            .filter(|&(idx, _)| idx != id_idx)
            .map(|(_, name)| name)
            .collect();

        Ok(Catalog { columns, items })
    }

    /// Column names, the id column excluded.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows, in file order.
    pub fn items(&self) -> &[CatalogItem] {
        &self.items
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether the catalog has no rows.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Index of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        let name = name.to_lowercase();
        self.columns.iter().position(|x| x.to_lowercase() == name)
    }

    /// The first item with global id `id`.
    pub fn get(&self, id: FieldId) -> Option<&CatalogItem> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Keep only items whose id lies in `ids`, returning how many were removed.
    pub fn retain_ids(&mut self, ids: &Range<FieldId>) -> usize {
        let before = self.items.len();
        self.items.retain(|item| ids.contains(&item.id));
        before - self.items.len()
    }

    /// Remove columns that are empty in every row.
    pub fn drop_empty_columns(&mut self) {
        let keep: Vec<bool> = (0..self.columns.len())
            .map(|column| {
                self.items
                    .iter()
                    .any(|item| item.value(column).map_or(false, |x| !x.is_empty()))
            })
            .collect();

        let dropped = keep.iter().filter(|&&x| !x).count();
        if dropped == 0 {
            return;
        }

        let retain = |values: Vec<String>| -> Vec<String> {
            values
                .into_iter()
                .zip(keep.iter())
                .filter(|&(_, &keep)| keep)
                .map(|(value, _)| value)
                .collect()
        };

        self.columns = retain(std::mem::replace(&mut self.columns, Vec::new()));
        for item in &mut self.items {
            item.values = retain(std::mem::replace(&mut item.values, Vec::new()));
        }

        debug!(dropped = dropped, "dropped empty catalog columns");
    }

    /// Multi-line `column: value` rendering of an item.
    pub fn describe(&self, item: &CatalogItem) -> String {
        let mut lines = vec![format!("id: {}", item.id)];
        lines.extend(
            self.columns
                .iter()
                .zip(item.values.iter())
                .filter(|&(_, value)| !value.is_empty())
                .map(|(column, value)| format!("{}: {}", column, value)),
        );
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MOVIES: &str = "\
id,title,genre,notes
1,Toy Story (1995),Animation,
2,GoldenEye (1995),Action,
3,Four Rooms (1995),Thriller,
";

    #[test]
    fn reads_and_shifts_ids() {
        let catalog = Catalog::from_reader(
            MOVIES.as_bytes(),
            &CatalogOptions::default(),
            &IdDiff::new(vec![0, 10], 20),
        )
        .unwrap();

        assert_eq!(catalog.columns(), &["title", "genre", "notes"]);
        assert_eq!(
            catalog.items().iter().map(|x| x.id()).collect::<Vec<_>>(),
            vec![11, 12, 13]
        );
        assert_eq!(catalog.get(12).unwrap().value(0), Some("GoldenEye (1995)"));
        assert_eq!(catalog.column_index("GENRE"), Some(1));
    }

    #[test]
    fn empty_columns_are_dropped() {
        let mut catalog = Catalog::from_reader(
            MOVIES.as_bytes(),
            &CatalogOptions::default(),
            &IdDiff::new(vec![0, 0], 10),
        )
        .unwrap();

        catalog.drop_empty_columns();

        assert_eq!(catalog.columns(), &["title", "genre"]);
        assert!(catalog.items().iter().all(|item| item.values().len() == 2));
        assert_eq!(
            catalog.describe(&catalog.items()[0]),
            "id: 1\ntitle: Toy Story (1995)\ngenre: Animation"
        );
    }

    #[test]
    fn headerless_files_take_column_names() {
        let data = "1|Toy Story (1995)\n2|GoldenEye (1995)\n";
        let options = CatalogOptions::default()
            .delimiter(b'|')
            .id_column("movie id")
            .columns(&["movie id", "title"]);

        let catalog = Catalog::from_reader(data.as_bytes(), &options, &IdDiff::new(vec![0, 5], 10)).unwrap();

        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(6).unwrap().value(0), Some("Toy Story (1995)"));
    }

    #[test]
    fn bad_ids_and_missing_columns_are_errors() {
        let id_diff = IdDiff::new(vec![0, 0], 10);

        match Catalog::from_reader(
            "name\nfoo\n".as_bytes(),
            &CatalogOptions::default(),
            &id_diff,
        ) {
            Err(CatalogError::MissingColumn { name }) => assert_eq!(name, "id"),
            other => panic!("unexpected result {:?}", other),
        }

        match Catalog::from_reader(
            "id,name\nx,foo\n".as_bytes(),
            &CatalogOptions::default(),
            &id_diff,
        ) {
            Err(CatalogError::InvalidId { line, value }) => {
                assert_eq!(line, 2);
                assert_eq!(value, "x");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn id_catalog_lists_interval() {
        let mut catalog = Catalog::from_ids(5..8);
        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.items()[0].values(), &["5".to_owned()]);

        assert_eq!(catalog.retain_ids(&(6..10)), 1);
        assert_eq!(catalog.get(5), None);
        assert_eq!(catalog.len(), 2);
    }
}
