use crate::format::TextFormat;
use crate::parser::TextParser;
use log_window::{BoundsUpdate, MessagesParser, ParserParams, PositionedMessagesProvider, ProviderError};
use parking_lot::RwLock;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A text log file as a message source.
///
/// The visible extent is the file size at the last bounds update, so a file
/// that is being written to only shows new messages once
/// [`update_available_bounds`](PositionedMessagesProvider::update_available_bounds)
/// noticed the growth.
#[derive(Debug)]
pub struct TextLogProvider {
    path: PathBuf,
    format: Arc<TextFormat>,
    size: RwLock<i64>,
}

impl TextLogProvider {
    pub fn open(path: impl AsRef<Path>, format: TextFormat) -> Result<Self, ProviderError> {
        let path = path.as_ref().to_path_buf();
        let size = file_size(&path)?;
        log::debug!("Opened text log {} ({} bytes)", path.display(), size);
        Ok(Self {
            path,
            format: Arc::new(format),
            size: RwLock::new(size),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn file_size(path: &Path) -> Result<i64, ProviderError> {
    let metadata = fs::metadata(path)?;
    if !metadata.is_file() {
        return Err(ProviderError::Unavailable(format!(
            "{} is not a regular file",
            path.display()
        )));
    }
    Ok(metadata.len() as i64)
}

impl PositionedMessagesProvider for TextLogProvider {
    fn begin_position(&self) -> i64 {
        0
    }

    fn end_position(&self) -> i64 {
        *self.size.read()
    }

    /// Re-stat the file. Text logs are append-only, so a smaller file means it
    /// was truncated or rotated; `incremental` makes no difference here.
    fn update_available_bounds(&self, _incremental: bool) -> Result<BoundsUpdate, ProviderError> {
        let current = file_size(&self.path)?;
        let mut size = self.size.write();
        let update = match current.cmp(&*size) {
            std::cmp::Ordering::Greater => BoundsUpdate::NewMessagesAvailable,
            std::cmp::Ordering::Less => {
                log::info!(
                    "{} shrank from {} to {} bytes",
                    self.path.display(),
                    *size,
                    current
                );
                BoundsUpdate::OldMessagesInvalidated
            }
            std::cmp::Ordering::Equal => BoundsUpdate::NothingUpdated,
        };
        *size = current;
        Ok(update)
    }

    fn create_parser(
        &self,
        params: ParserParams,
    ) -> Result<Box<dyn MessagesParser + '_>, ProviderError> {
        let end = self.end_position();
        let stop = params.range.as_ref().map_or(end, |r| r.end);
        let parser = TextParser::open(
            &self.path,
            self.format.clone(),
            params.start_position,
            stop,
            end,
        )?;
        Ok(Box::new(parser))
    }
}
