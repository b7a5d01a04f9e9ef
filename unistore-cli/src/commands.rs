//! Implementations of the CLI subcommands.
//!
//! Every command writes its result to the given writer, which is stdout in the binary.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use unistore_service::{CanonicalPath, Storage};

/// Downloads `path` into `output`, or into a file named like the object in the current
/// directory. Prints the written file name.
pub async fn get(
    storage: &Storage,
    path: &str,
    output: Option<&Path>,
    out: &mut impl Write,
) -> Result<()> {
    let file = storage.get(path).await?;

    let destination = match output {
        Some(output) => output.to_owned(),
        None => PathBuf::from(CanonicalPath::new(path).name()),
    };
    // The temporary file is removed when `file` drops, after the copy.
    let size = tokio::fs::copy(file.path(), &destination)
        .await
        .with_context(|| format!("failed to write {}", destination.display()))?;

    tracing::debug!(size, destination = %destination.display(), "Downloaded object");
    writeln!(out, "{}", destination.display())?;
    Ok(())
}

/// Streams the contents of `path` to `out`.
pub async fn cat(storage: &Storage, path: &str, out: &mut impl Write) -> Result<()> {
    let mut stream = storage.get_stream(path).await?;
    while let Some(chunk) = stream.try_next().await? {
        out.write_all(&chunk)?;
    }
    out.flush()?;
    Ok(())
}

/// Uploads `source`, or stdin when no file is given, to `path`.
pub async fn put(
    storage: &Storage,
    path: &str,
    source: Option<&Path>,
    out: &mut impl Write,
) -> Result<()> {
    let object = match source {
        Some(source) => {
            let file = tokio::fs::File::open(source)
                .await
                .with_context(|| format!("failed to open {}", source.display()))?;
            storage.put_reader(path, file).await?
        }
        None => storage.put_reader(path, tokio::io::stdin()).await?,
    };

    writeln!(out, "{}\t{}", object.path, object.size)?;
    Ok(())
}

/// Deletes `path`.
pub async fn rm(storage: &Storage, path: &str, out: &mut impl Write) -> Result<()> {
    storage.delete(path).await?;
    writeln!(out, "{}", CanonicalPath::new(path))?;
    Ok(())
}

/// Prints one line per object below `prefix`: size, modification time and path.
pub async fn ls(storage: &Storage, prefix: &str, out: &mut impl Write) -> Result<()> {
    let mut objects = storage.list(prefix).await?;
    objects.sort_by(|a, b| a.path.cmp(&b.path));

    for object in objects {
        let modified = object
            .last_modified
            .map_or_else(|| "-".to_owned(), |ts| ts.to_string());
        writeln!(out, "{:>12}  {modified}  {}", object.size, object.path)?;
    }
    Ok(())
}

/// Prints a URL through which `path` can be fetched directly.
pub async fn url(storage: &Storage, path: &str, out: &mut impl Write) -> Result<()> {
    let url = storage.get_url(path).await?;
    writeln!(out, "{url}")?;
    Ok(())
}

/// Prints the configured endpoint of the backend.
pub fn endpoint(storage: &Storage, out: &mut impl Write) -> Result<()> {
    writeln!(out, "{}", storage.endpoint())?;
    Ok(())
}
