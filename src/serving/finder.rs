use tracing::Span;

use super::ServingError;
use crate::catalog::{Catalog, CatalogItem};

/// Fuzzy text lookup of catalog items.
///
/// A query matches a field when the field contains it, ignoring case. When
/// no field does, a field also matches if it contains every whitespace
/// separated word of the query. The first matching item in catalog order is
/// returned.
pub struct Finder<'a> {
    catalog: &'a Catalog,
    columns: Vec<usize>,
    span: Span,
}

impl<'a> Finder<'a> {
    /// Search `fields` of `catalog`, or every field when `fields` is empty.
    pub fn new<S: AsRef<str>>(
        catalog: &'a Catalog,
        fields: &[S],
        span: Span,
    ) -> Result<Self, ServingError> {
        let columns = if fields.is_empty() {
            (0..catalog.columns().len()).collect()
        } else {
            fields
                .iter()
                .map(|field| {
                    catalog
                        .column_index(field.as_ref())
                        .ok_or_else(|| ServingError::UnknownField {
                            field: field.as_ref().to_owned(),
                        })
                })
                .collect::<Result<Vec<_>, _>>()?
        };

        Ok(Finder {
            catalog,
            columns,
            span,
        })
    }

    fn fields<'b>(&'b self, item: &'b CatalogItem) -> impl Iterator<Item = String> + 'b {
        self.columns
            .iter()
            .filter_map(move |&column| item.value(column))
            .map(str::to_lowercase)
    }

    /// The first catalog item matching `query`.
    pub fn find(&self, query: &str) -> Result<&'a CatalogItem, ServingError> {
        let _enter = self.span.enter();
        let needle = query.trim().to_lowercase();
        let words: Vec<&str> = needle.split_whitespace().collect();

        if words.is_empty() {
            return Err(ServingError::NotFound {
                query: query.to_owned(),
            });
        }

        let catalog = self.catalog;
        let found = catalog
            .items()
            .iter()
            .find(|item| self.fields(item).any(|field| field.contains(needle.as_str())))
            .or_else(|| {
                catalog.items().iter().find(|item| {
                    self.fields(item)
                        .any(|field| words.iter().all(|word| field.contains(word)))
                })
            });

        match found {
            Some(item) => {
                debug!(query = query, id = item.id(), "found catalog item");
                Ok(item)
            }
            None => Err(ServingError::NotFound {
                query: query.to_owned(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogItem;

    fn catalog() -> Catalog {
        Catalog::new(
            vec!["title".to_owned(), "genre".to_owned()],
            vec![
                CatalogItem::new(10, vec!["Toy Story (1995)".to_owned(), "Animation".to_owned()]),
                CatalogItem::new(11, vec!["Star Wars (1977)".to_owned(), "Sci-Fi".to_owned()]),
                CatalogItem::new(12, vec!["Toy Story 2 (1999)".to_owned(), "Animation".to_owned()]),
                CatalogItem::new(13, vec!["Wars of the Stars".to_owned(), "Toy".to_owned()]),
            ],
        )
    }

    #[test]
    fn substring_match_is_case_insensitive_and_first_wins() {
        let catalog = catalog();
        let finder = Finder::new(&catalog, &[] as &[&str], Span::none()).unwrap();

        assert_eq!(finder.find("toy story").unwrap().id(), 10);
        assert_eq!(finder.find("STORY 2").unwrap().id(), 12);
        assert_eq!(finder.find("sci-fi").unwrap().id(), 11);
    }

    #[test]
    fn falls_back_to_all_words_in_one_field() {
        let catalog = catalog();
        let finder = Finder::new(&catalog, &["title"], Span::none()).unwrap();

        assert_eq!(finder.find("wars star").unwrap().id(), 11);
        // Words split across fields do not match.
        assert!(finder.find("animation toy").is_err());
    }

    #[test]
    fn restricted_fields_and_errors() {
        let catalog = catalog();

        let by_genre = Finder::new(&catalog, &["Genre"], Span::none()).unwrap();
        assert_eq!(by_genre.find("toy").unwrap().id(), 13);

        match Finder::new(&catalog, &["year"], Span::none()) {
            Err(ServingError::UnknownField { field }) => assert_eq!(field, "year"),
            _ => panic!("expected an unknown field"),
        }

        match by_genre.find("western") {
            Err(ServingError::NotFound { query }) => assert_eq!(query, "western"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(by_genre.find("   ").is_err());
    }
}
