use crate::error::PipelineError;
use crate::keys::KeySet;
use crate::table::Table;

/// Keeps the rows of `chunk` whose key is in `keys`, projected onto `columns`.
/// The projection is checked even when nothing matches.
pub fn filter_chunk(
    chunk: &Table,
    key: &str,
    keys: &KeySet,
    columns: &[String],
) -> Result<Table, PipelineError> {
    let key_values = chunk.column(key)?;
    let kept = chunk.retain_rows(|idx| {
        key_values[idx]
            .as_deref()
            .is_some_and(|value| keys.contains(value))
    });
    kept.select(columns)
}

/// Lazy filter over a sequence of chunks. Chunks without matches are skipped,
/// and the first error ends the sequence.
pub struct ChunkedFilter<'a, I> {
    chunks: I,
    key: &'a str,
    keys: &'a KeySet,
    columns: &'a [String],
    consumed: usize,
    failed: bool,
    observer: Option<Box<dyn FnMut(usize) + 'a>>,
}

impl<'a, I> ChunkedFilter<'a, I>
where
    I: Iterator<Item = Result<Table, PipelineError>>,
{
    pub fn new<C>(chunks: C, key: &'a str, keys: &'a KeySet, columns: &'a [String]) -> Self
    where
        C: IntoIterator<IntoIter = I, Item = Result<Table, PipelineError>>,
    {
        ChunkedFilter {
            chunks: chunks.into_iter(),
            key,
            keys,
            columns,
            consumed: 0,
            failed: false,
            observer: None,
        }
    }

    /// Called with the number of source chunks consumed after each one,
    /// whether or not it produced rows.
    pub fn on_chunk(mut self, observer: impl FnMut(usize) + 'a) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn chunks_consumed(&self) -> usize {
        self.consumed
    }
}

impl<I> Iterator for ChunkedFilter<'_, I>
where
    I: Iterator<Item = Result<Table, PipelineError>>,
{
    type Item = Result<Table, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            let filtered = self.chunks.next()?.and_then(|chunk| {
                filter_chunk(&chunk, self.key, self.keys, self.columns)
            });
            self.consumed += 1;
            match filtered {
                Err(err) => {
                    self.failed = true;
                    return Some(Err(err));
                }
                Ok(table) => {
                    log::debug!("chunk {}: {} matching rows", self.consumed, table.height());
                    if let Some(observer) = self.observer.as_mut() {
                        observer(self.consumed);
                    }
                    if !table.is_empty() {
                        return Some(Ok(table));
                    }
                }
            }
        }
    }
}
