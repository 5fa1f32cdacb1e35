use futures::{Stream, ready};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_postgres::CopyOutStream;
use tracing::warn;

use crate::conversions::table_row::TableRowConverter;
use crate::error::{EtlError, EtlResult};
use crate::types::{ColumnSchema, TableRow};

/// One line of `COPY` output.
#[derive(Debug)]
pub enum CopiedRow {
    Decoded(TableRow),
    /// The line could not be decoded into the expected columns.
    Undecodable(EtlError),
}

pin_project! {
    /// Decodes the lines of a text format [`CopyOutStream`] into [`TableRow`]s.
    ///
    /// The stream keeps its connection checked out of its pool until it is dropped, so the copy can
    /// outlive the call that started it.
    #[must_use = "streams do nothing unless polled"]
    pub struct TableCopyStream<C> {
        #[pin]
        stream: CopyOutStream,
        column_schemas: Arc<[ColumnSchema]>,
        _connection: C,
    }
}

impl<C> TableCopyStream<C> {
    pub fn wrap(stream: CopyOutStream, column_schemas: Arc<[ColumnSchema]>, connection: C) -> Self {
        Self {
            stream,
            column_schemas,
            _connection: connection,
        }
    }
}

impl<C> Stream for TableCopyStream<C> {
    type Item = EtlResult<CopiedRow>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        match ready!(this.stream.poll_next(cx)) {
            Some(Ok(row)) => match TableRowConverter::try_from(&row, this.column_schemas) {
                Ok(row) => Poll::Ready(Some(Ok(CopiedRow::Decoded(row)))),
                Err(err) => {
                    warn!(error = %err, "skipping source row that could not be decoded");
                    Poll::Ready(Some(Ok(CopiedRow::Undecodable(err))))
                }
            },
            Some(Err(err)) => Poll::Ready(Some(Err(err.into()))),
            None => Poll::Ready(None),
        }
    }
}
