//! Page-at-a-time selects.
//!
//! Two strategies return the same rows for a table that does not change
//! between calls:
//!
//! - [`PageStrategy::OffsetLimit`] re-queries with `LIMIT`/`OFFSET`
//! - [`PageStrategy::Scroll`] runs the unpaged select, skips rows on a
//!   forward cursor and drops it after the page
//!
//! Pages are 1-based.

use crate::executor::{self, Selection};
use rowbind_core::{
    Connection, ConnectionProvider, Error, OperationError, OperationKind, Record, RecordType,
    Result, Value, relationship::CascadeContext,
};
use rowbind_query::Aggregate;
use std::sync::Arc;

/// How [`PaginatedSelect`] positions itself on a page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PageStrategy {
    /// One `LIMIT`/`OFFSET` query per page.
    #[default]
    OffsetLimit,
    /// Skip rows on a cursor over the full result.
    Scroll,
}

/// A select split into pages of `page_size` rows.
///
/// Rows bypass the session cache; relationships cascade as for
/// [`Session::cursor`](crate::Session::cursor).
pub struct PaginatedSelect<'s, R> {
    connection: &'s dyn Connection,
    provider: Option<Arc<dyn ConnectionProvider>>,
    lazy: bool,
    descriptor: Arc<RecordType<R>>,
    condition: Option<String>,
    order: Option<String>,
    params: Vec<Value>,
    page_size: u64,
    strategy: PageStrategy,
}

impl<'s, R: Record> PaginatedSelect<'s, R> {
    pub fn new(
        connection: &'s dyn Connection,
        condition: Option<&str>,
        order: Option<&str>,
        params: Vec<Value>,
        page_size: u64,
    ) -> Result<Self> {
        Ok(Self {
            connection,
            provider: None,
            lazy: true,
            descriptor: RecordType::<R>::get()?,
            condition: condition.map(str::to_string),
            order: order.map(str::to_string),
            params,
            page_size,
            strategy: PageStrategy::default(),
        })
    }

    /// Attach lazy relationships of loaded records to `provider`.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn ConnectionProvider>, lazy: bool) -> Self {
        self.provider = Some(provider);
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn strategy(mut self, strategy: PageStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    fn context(&self) -> CascadeContext<'s> {
        let ctx = CascadeContext::new(self.connection).lazy_loading(self.lazy);
        match &self.provider {
            Some(provider) => ctx.with_provider(Arc::clone(provider)),
            None => ctx,
        }
    }

    fn invalid(&self, message: &str) -> Error {
        Error::Operation(OperationError::new(
            OperationKind::SelectAll,
            self.descriptor.table(),
            message,
        ))
    }

    /// Rows of page `page`, in result order. Past the last page the result
    /// is empty.
    #[tracing::instrument(level = "debug", skip(self), fields(table = self.descriptor.table(), size = self.page_size))]
    pub fn select_page(&self, page: u64) -> Result<Vec<R>> {
        if self.page_size == 0 {
            return Err(self.invalid("page size must be at least 1"));
        }
        if page == 0 {
            return Err(self.invalid("pages are numbered from 1"));
        }
        let offset = (page - 1).saturating_mul(self.page_size);
        let condition = self.condition.as_deref();
        let order = self.order.as_deref();

        match self.strategy {
            PageStrategy::OffsetLimit => {
                let selection = Selection::Page {
                    condition,
                    order,
                    limit: self.page_size,
                    offset,
                };
                executor::open_cursor(
                    self.context(),
                    Arc::clone(&self.descriptor),
                    &selection,
                    &self.params,
                )?
                .collect()
            }
            PageStrategy::Scroll => {
                let selection = Selection::Named { condition, order };
                let mut cursor = executor::open_cursor(
                    self.context(),
                    Arc::clone(&self.descriptor),
                    &selection,
                    &self.params,
                )?;
                let skipped = cursor.skip_rows(offset)?;
                tracing::trace!(skipped, "Positioned cursor");
                let size = usize::try_from(self.page_size).unwrap_or(usize::MAX);
                cursor.take(size).collect()
            }
        }
    }

    /// Number of pages, from a `COUNT(*)` with the same condition.
    pub fn page_count(&self) -> Result<u64> {
        if self.page_size == 0 {
            return Err(self.invalid("page size must be at least 1"));
        }
        let total = executor::aggregate(
            self.connection,
            &self.descriptor,
            Aggregate::Count,
            "*",
            self.condition.as_deref(),
            &self.params,
        )?;
        let rows = total
            .as_i64()
            .and_then(|n| u64::try_from(n).ok())
            .ok_or_else(|| self.invalid("COUNT did not return a row count"))?;
        Ok(rows.div_ceil(self.page_size))
    }

    /// Every page in order. The page count is taken once, up front.
    pub fn pages(&self) -> Result<Pages<'_, 's, R>> {
        let total = self.page_count()?;
        Ok(Pages {
            select: self,
            next: 1,
            total,
        })
    }
}

impl<R> std::fmt::Debug for PaginatedSelect<'_, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaginatedSelect")
            .field("condition", &self.condition)
            .field("order", &self.order)
            .field("page_size", &self.page_size)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Iterator over the pages of a [`PaginatedSelect`].
#[derive(Debug)]
pub struct Pages<'p, 's, R> {
    select: &'p PaginatedSelect<'s, R>,
    next: u64,
    total: u64,
}

impl<R: Record> Iterator for Pages<'_, '_, R> {
    type Item = Result<Vec<R>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next > self.total {
            return None;
        }
        let page = self.select.select_page(self.next);
        self.next += 1;
        if page.is_err() {
            self.next = self.total + 1;
        }
        Some(page)
    }
}
