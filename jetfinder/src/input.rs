//! Sighting input for `jetfinder run --stdin`
//!
//! One sighting per line, `identifier,strength`. Blank lines and lines
//! starting with `#` are ignored.

use anyhow::{bail, Context, Result};
use jetfinder_core::Sighting;

/// Parse one input line.
///
/// Returns `Ok(None)` for lines that carry no sighting.
pub fn parse_sighting_line(line: &str) -> Result<Option<Sighting>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let Some((identifier, strength)) = line.rsplit_once(',') else {
        bail!("expected `identifier,strength`, got {:?}", line);
    };

    let identifier = identifier.trim();
    if identifier.is_empty() {
        bail!("missing beacon identifier in {:?}", line);
    }

    let strength = strength
        .trim()
        .parse::<i32>()
        .with_context(|| format!("invalid signal strength in {:?}", line))?;

    Ok(Some(Sighting::new(identifier, strength)))
}
