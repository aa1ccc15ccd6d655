//! Bulk text import of whole groups.
//!
//! # Responsibility
//! - Parse pasted spreadsheet text into a grid of trimmed cells.
//! - Resolve each column into one provisional group: row 0 names the leader,
//!   later rows name ordinary members.
//!
//! # Invariants
//! - Resolution only consumes people from the Unassigned Bucket, by exact
//!   display name, column-major then row-major.
//! - A name consumed by an earlier cell never resolves again.
//! - Unresolved names never abort the import; they are reported as misses.

use crate::config::ImportConfig;
use crate::model::group::{GroupId, Role};
use crate::model::person::PersonId;
use crate::service::placement::{PlacementEngine, PlacementError};
use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;

static LINE_BREAK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\r\n|\n|\r").expect("valid line break regex"));

/// Position of a cell inside its column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Row 0: prospective leader.
    Header,
    /// Rows 1..N: prospective member.
    Member,
}

/// One cell bound to a person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCell {
    pub row: usize,
    pub column: usize,
    pub kind: CellKind,
    pub group_id: GroupId,
    pub person_id: PersonId,
}

/// One non-empty cell that matched no unassigned person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionMiss {
    pub row: usize,
    pub column: usize,
    pub kind: CellKind,
    /// Text as typed (trimmed).
    pub name: String,
}

/// Outcome of one import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    /// New provisional groups, in column order.
    pub created_groups: Vec<GroupId>,
    pub resolved: Vec<ResolvedCell>,
    pub misses: Vec<ResolutionMiss>,
}

impl ImportReport {
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_clean(&self) -> bool {
        self.misses.is_empty()
    }
}

/// Rows of trimmed cells; short rows are padded with empty cells on access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportGrid {
    rows: Vec<Vec<String>>,
    width: usize,
}

impl ImportGrid {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    /// Returns the cell text, or `""` outside a short row.
    pub fn cell(&self, row: usize, column: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|cells| cells.get(column))
            .map_or("", String::as_str)
    }
}

/// Parser/resolver for tabular group text.
#[derive(Debug, Clone)]
pub struct BulkTextResolver {
    delimiter: char,
}

impl Default for BulkTextResolver {
    fn default() -> Self {
        Self::new(&ImportConfig::default())
    }
}

impl BulkTextResolver {
    pub fn new(config: &ImportConfig) -> Self {
        Self {
            delimiter: config.delimiter,
        }
    }

    /// Splits text into rows and delimited, trimmed cells.
    ///
    /// Trailing empty lines are dropped.
    pub fn parse(&self, text: &str) -> ImportGrid {
        let mut rows = LINE_BREAK_RE
            .split(text)
            .map(|line| {
                line.split(self.delimiter)
                    .map(|cell| cell.trim().to_string())
                    .collect::<Vec<_>>()
            })
            .collect::<Vec<_>>();
        while rows
            .last()
            .is_some_and(|cells| cells.iter().all(String::is_empty))
        {
            rows.pop();
        }
        let width = rows.iter().map(Vec::len).max().unwrap_or(0);
        ImportGrid { rows, width }
    }

    /// Resolves `text` into new provisional groups inside `engine`.
    ///
    /// Columns with an empty header are skipped. An unmatched header still
    /// yields a group, auto-named after the typed label with no leader.
    ///
    /// # Errors
    /// Only `PlacementError::Invariant`; resolution misses are reported.
    pub fn resolve(
        &self,
        engine: &mut PlacementEngine,
        text: &str,
    ) -> Result<ImportReport, PlacementError> {
        let grid = self.parse(text);
        let mut report = ImportReport::default();

        for column in 0..grid.width() {
            let header = grid.cell(0, column);
            if header.is_empty() {
                continue;
            }

            let group_id = engine.create_labelled_group(header)?;
            report.created_groups.push(group_id);
            self.bind_cell(engine, &mut report, group_id, 0, column, header)?;

            for row in 1..grid.height() {
                let name = grid.cell(row, column);
                if name.is_empty() {
                    continue;
                }
                self.bind_cell(engine, &mut report, group_id, row, column, name)?;
            }
        }

        info!(
            "event=bulk_import module=import status=ok columns={} groups={} resolved={} misses={}",
            grid.width(),
            report.created_groups.len(),
            report.resolved.len(),
            report.misses.len()
        );
        Ok(report)
    }

    fn bind_cell(
        &self,
        engine: &mut PlacementEngine,
        report: &mut ImportReport,
        group_id: GroupId,
        row: usize,
        column: usize,
        name: &str,
    ) -> Result<(), PlacementError> {
        let (kind, role) = if row == 0 {
            (CellKind::Header, Role::Leader)
        } else {
            (CellKind::Member, Role::Member)
        };

        match engine.partition().find_unassigned_by_name(name) {
            Some(person_id) => {
                engine.place(person_id, group_id, role)?;
                report.resolved.push(ResolvedCell {
                    row,
                    column,
                    kind,
                    group_id,
                    person_id,
                });
            }
            None => {
                // Names stay out of logs; coordinates are enough to find the cell.
                warn!(
                    "event=bulk_import_miss module=import status=skipped row={} column={} kind={}",
                    row,
                    column,
                    if kind == CellKind::Header { "header" } else { "member" }
                );
                report.misses.push(ResolutionMiss {
                    row,
                    column,
                    kind,
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{BulkTextResolver, CellKind};
    use crate::config::{ImportConfig, NamingConfig};
    use crate::model::group::GroupName;
    use crate::model::partition::Partition;
    use crate::model::person::{Person, PersonId};
    use crate::service::placement::PlacementEngine;

    fn engine_with(names: &[&str]) -> PlacementEngine {
        let people = names
            .iter()
            .enumerate()
            .map(|(index, name)| Person::new(PersonId(index as i64 + 1), *name))
            .collect();
        let partition = Partition::hydrate(2024, people, vec![]).unwrap();
        PlacementEngine::new(partition, NamingConfig::default())
    }

    #[test]
    fn parse_pads_short_rows_and_drops_trailing_blank_lines() {
        let grid = BulkTextResolver::default().parse("a\tb\tc\r\n d \n\n");
        assert_eq!(grid.width(), 3);
        assert_eq!(grid.height(), 2);
        assert_eq!(grid.cell(1, 0), "d");
        assert_eq!(grid.cell(1, 2), "");
        assert_eq!(grid.cell(9, 9), "");
    }

    #[test]
    fn resolves_columns_into_groups_and_consumes_bucket() {
        let mut engine = engine_with(&["Alice", "Bob", "Carol"]);
        let resolver = BulkTextResolver::default();

        let report = resolver.resolve(&mut engine, "Alice\tBob\nCarol\t").unwrap();
        assert_eq!(report.created_groups.len(), 2);
        assert!(report.is_clean());

        let alice_group = engine.partition().group(report.created_groups[0]).unwrap();
        assert_eq!(alice_group.leader(), Some(PersonId(1)));
        assert!(alice_group.members().contains(&PersonId(3)));
        assert_eq!(alice_group.name().as_str(), "Alice — group");

        let bob_group = engine.partition().group(report.created_groups[1]).unwrap();
        assert_eq!(bob_group.leader(), Some(PersonId(2)));
        assert!(bob_group.members().is_empty());
        assert!(engine.partition().unassigned().is_empty());

        let rerun = resolver.resolve(&mut engine, "Alice\tBob\nCarol\t").unwrap();
        assert_eq!(rerun.resolved_count(), 0);
        assert_eq!(rerun.misses.len(), 3);
    }

    #[test]
    fn duplicate_name_resolves_only_first_cell() {
        let mut engine = engine_with(&["Alice"]);
        let report = BulkTextResolver::default()
            .resolve(&mut engine, "Bob\tAlice\nAlice\t")
            .unwrap();

        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.resolved[0].row, 1);
        assert_eq!(report.resolved[0].column, 0);
        assert_eq!(report.resolved[0].kind, CellKind::Member);

        let miss = report
            .misses
            .iter()
            .find(|miss| miss.name == "Alice")
            .expect("second Alice must miss");
        assert_eq!((miss.row, miss.column), (0, 1));
        assert_eq!(miss.kind, CellKind::Header);
    }

    #[test]
    fn unmatched_header_keeps_label_only_group() {
        let mut engine = engine_with(&["Carol"]);
        let report = BulkTextResolver::default()
            .resolve(&mut engine, "Zed\nCarol")
            .unwrap();

        let group = engine.partition().group(report.created_groups[0]).unwrap();
        assert_eq!(group.leader(), None);
        assert_eq!(group.name(), &GroupName::Auto("Zed — group".to_string()));
        assert!(group.members().contains(&PersonId(1)));
        assert_eq!(report.misses.len(), 1);
        assert_eq!(report.misses[0].kind, CellKind::Header);
    }

    #[test]
    fn empty_header_skips_whole_column() {
        let mut engine = engine_with(&["Alice", "Bob"]);
        let report = BulkTextResolver::default()
            .resolve(&mut engine, "\tAlice\nBob\t")
            .unwrap();

        assert_eq!(report.created_groups.len(), 1);
        assert!(engine.partition().unassigned().contains(&PersonId(2)));
        assert!(report.is_clean());
    }

    #[test]
    fn already_placed_people_are_not_candidates() {
        let mut engine = engine_with(&["Alice", "Bob"]);
        let existing = engine.create_group(Some("Existing")).unwrap();
        engine
            .place(PersonId(2), existing, crate::model::group::Role::Member)
            .unwrap();

        let report = BulkTextResolver::default()
            .resolve(&mut engine, "Alice\nBob")
            .unwrap();
        assert_eq!(report.misses.len(), 1);
        assert_eq!(report.misses[0].name, "Bob");
        assert!(engine
            .partition()
            .group(existing)
            .unwrap()
            .members()
            .contains(&PersonId(2)));
    }

    #[test]
    fn custom_delimiter_is_honoured() {
        let mut engine = engine_with(&["Alice", "Bob"]);
        let resolver = BulkTextResolver::new(&ImportConfig { delimiter: ',' });
        let report = resolver.resolve(&mut engine, "Alice, Bob").unwrap();
        assert_eq!(report.created_groups.len(), 2);
        assert_eq!(report.resolved_count(), 2);
    }

    #[test]
    fn empty_text_creates_nothing() {
        let mut engine = engine_with(&["Alice"]);
        let report = BulkTextResolver::default().resolve(&mut engine, "").unwrap();
        assert!(report.created_groups.is_empty());
        assert_eq!(engine.partition().group_count(), 0);
    }
}
