use std::fmt;

/// How the rows staged by a run replace the rows already in the target table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadMode {
    /// Every row of the table is deleted before the staged files are copied in.
    #[default]
    Replace,
    /// Staged files are copied in on top of the existing rows.
    Append,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Append => write!(f, "append"),
        }
    }
}

/// Replication settings of one source table for a single run.
///
/// Built from a validated table config by the planner. The filter clause already includes the
/// incremental bound, so a table pipeline never needs to know which ingestion mode produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct TableReplication {
    pub source_table: String,
    pub target_table_name: String,
    /// Columns to extract in order, empty means all columns.
    pub selected_fields: Vec<String>,
    pub filter_clause: Option<String>,
    /// Rows per extracted file. `None` extracts the whole table into a single file.
    pub batch_size: Option<usize>,
    pub replicate: bool,
    pub view_name: Option<String>,
    pub load_mode: LoadMode,
}

impl TableReplication {
    /// Creates a full-table replication with every optional setting left unset.
    pub fn new(source_table: impl Into<String>) -> Self {
        let source_table = source_table.into();

        Self {
            target_table_name: source_table.clone(),
            source_table,
            selected_fields: vec![],
            filter_clause: None,
            batch_size: None,
            replicate: true,
            view_name: None,
            load_mode: LoadMode::Replace,
        }
    }

    pub fn with_target_table_name(mut self, target_table_name: impl Into<String>) -> Self {
        self.target_table_name = target_table_name.into();
        self
    }

    pub fn with_selected_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selected_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_filter_clause(mut self, filter_clause: impl Into<String>) -> Self {
        self.filter_clause = Some(filter_clause.into());
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_replicate(mut self, replicate: bool) -> Self {
        self.replicate = replicate;
        self
    }

    pub fn with_view_name(mut self, view_name: impl Into<String>) -> Self {
        self.view_name = Some(view_name.into());
        self
    }

    pub fn with_load_mode(mut self, load_mode: LoadMode) -> Self {
        self.load_mode = load_mode;
        self
    }
}
