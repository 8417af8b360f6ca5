//! Maps source files to conversion tasks.
//!
//! A file is tracked when its name ends with `.<ext>` for a configured
//! extension `ext`. When several registered extensions match (`gz` and
//! `tar.gz`), the longest one wins; equal lengths fall back to config order.
//! Matching is case-sensitive.

use crate::models::config::{DESTINATION_PLACEHOLDER, SOURCE_PLACEHOLDER};
use crate::models::{FormatRule, SyncConfig};
use camino::{Utf8Path, Utf8PathBuf};
use regex::{Captures, Regex};

/// A resolved conversion: where a source file goes and how to get it there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionTask {
    pub source_path: Utf8PathBuf,

    /// The registered source extension that matched
    pub extension: String,

    pub destination_path: Utf8PathBuf,

    /// Command template with both placeholders substituted
    pub command: String,
}

/// Resolves source files against the configured format rules.
///
/// Pure computation: nothing here touches the filesystem.
#[derive(Debug, Clone)]
pub struct FormatResolver {
    source_root: Utf8PathBuf,
    destination_root: Utf8PathBuf,

    /// Registered extensions, longest first
    rules: Vec<(String, FormatRule)>,

    placeholder_pattern: Regex,
}

impl FormatResolver {
    pub fn new(config: &SyncConfig) -> Self {
        let mut rules: Vec<(String, FormatRule)> = config
            .formats
            .iter()
            .map(|(extension, rule)| (extension.clone(), rule.clone()))
            .collect();
        // Stable sort keeps config order between equal lengths
        rules.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

        Self {
            source_root: config.source.clone(),
            destination_root: config.destination.clone(),
            rules,
            placeholder_pattern: Regex::new(r"\$(source|destination)")
                .expect("Invalid placeholder regex"),
        }
    }

    /// Find the rule for a file name, if any.
    ///
    /// The name must have a non-empty stem before the matched extension, so a
    /// hidden file named `.flac` is not tracked.
    pub fn match_format(&self, file_name: &str) -> Option<(&str, &FormatRule)> {
        self.rules
            .iter()
            .find(|(extension, _)| {
                file_name.len() > extension.len() + 1
                    && file_name.ends_with(extension.as_str())
                    && file_name.as_bytes()[file_name.len() - extension.len() - 1] == b'.'
            })
            .map(|(extension, rule)| (extension.as_str(), rule))
    }

    /// Resolve a source file into a [`ConversionTask`].
    ///
    /// Returns `None` for untracked extensions and for paths outside the
    /// source root.
    pub fn resolve(&self, source_file: &Utf8Path) -> Option<ConversionTask> {
        let (extension, rule) = self.match_format(source_file.file_name()?)?;

        let relative = match source_file.strip_prefix(&self.source_root) {
            Ok(relative) => relative,
            Err(_) => {
                tracing::warn!(
                    "Ignoring {} because it is not under the source root {}",
                    source_file,
                    self.source_root
                );
                return None;
            }
        };

        let relative_base = relative
            .as_str()
            .strip_suffix(extension)?
            .strip_suffix('.')?;

        let destination_path = Utf8PathBuf::from(format!(
            "{}.{}",
            self.destination_root.join(relative_base),
            rule.convert_to
        ));

        let command = self.render_command(&rule.command, source_file, &destination_path);

        Some(ConversionTask {
            source_path: source_file.to_path_buf(),
            extension: extension.to_string(),
            destination_path,
            command,
        })
    }

    /// Substitute `$source` and `$destination` with the quoted paths.
    ///
    /// Substitution is a single pass over the template, so text inside the
    /// inserted paths is never substituted again.
    pub fn render_command(
        &self,
        template: &str,
        source: &Utf8Path,
        destination: &Utf8Path,
    ) -> String {
        self.placeholder_pattern
            .replace_all(template, |caps: &Captures<'_>| {
                if &caps[0] == SOURCE_PLACEHOLDER {
                    quote_path(source)
                } else {
                    debug_assert_eq!(&caps[0], DESTINATION_PLACEHOLDER);
                    quote_path(destination)
                }
            })
            .into_owned()
    }

    pub fn source_root(&self) -> &Utf8Path {
        &self.source_root
    }

    pub fn destination_root(&self) -> &Utf8Path {
        &self.destination_root
    }
}

/// Resolve a single file against a configuration
pub fn resolve(source_file: &Utf8Path, config: &SyncConfig) -> Option<ConversionTask> {
    FormatResolver::new(config).resolve(source_file)
}

/// Wrap a path in double quotes for the host shell.
///
/// On Unix the characters that stay special inside double quotes are
/// backslash-escaped.
pub fn quote_path(path: &Utf8Path) -> String {
    let raw = path.as_str();
    let mut quoted = String::with_capacity(raw.len() + 2);
    quoted.push('"');
    for c in raw.chars() {
        if cfg!(unix) && matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn config_with(formats: &[(&str, &str, &str)]) -> SyncConfig {
        let formats: IndexMap<String, FormatRule> = formats
            .iter()
            .map(|(ext, to, cmd)| (ext.to_string(), FormatRule::new(*to, *cmd)))
            .collect();
        SyncConfig::new("/src", "/dst", 2, formats)
    }

    #[test]
    fn test_resolve_flac_to_mp3() {
        let config = config_with(&[("flac", "mp3", "convert $source $destination")]);

        let task = resolve(Utf8Path::new("/src/a.flac"), &config).unwrap();

        assert_eq!(task.destination_path, Utf8PathBuf::from("/dst/a.mp3"));
        assert_eq!(task.command, r#"convert "/src/a.flac" "/dst/a.mp3""#);
        assert_eq!(task.extension, "flac");
    }

    #[test]
    fn test_untracked_extension_is_ignored() {
        let config = config_with(&[("flac", "mp3", "convert $source $destination")]);

        assert!(resolve(Utf8Path::new("/src/b.txt"), &config).is_none());
        // Suffix without a dot boundary
        assert!(resolve(Utf8Path::new("/src/b.myflac"), &config).is_none());
        // No stem
        assert!(resolve(Utf8Path::new("/src/.flac"), &config).is_none());
    }

    #[test]
    fn test_nested_path_keeps_structure() {
        let config = config_with(&[("flac", "ogg", "oggenc $source -o $destination")]);

        let task = resolve(Utf8Path::new("/src/Artist/Album 1/01 Intro.flac"), &config).unwrap();

        assert_eq!(
            task.destination_path,
            Utf8PathBuf::from("/dst/Artist/Album 1/01 Intro.ogg")
        );
    }

    #[test]
    fn test_longest_registered_suffix_wins() {
        let config = config_with(&[
            ("gz", "txt", "gunzip -c $source > $destination"),
            ("tar.gz", "tar", "gunzip -c $source > $destination"),
        ]);

        let task = resolve(Utf8Path::new("/src/backup.tar.gz"), &config).unwrap();
        assert_eq!(task.extension, "tar.gz");
        assert_eq!(task.destination_path, Utf8PathBuf::from("/dst/backup.tar"));

        let task = resolve(Utf8Path::new("/src/notes.gz"), &config).unwrap();
        assert_eq!(task.extension, "gz");
        assert_eq!(task.destination_path, Utf8PathBuf::from("/dst/notes.txt"));
    }

    #[test]
    fn test_file_outside_source_root_is_ignored() {
        let config = config_with(&[("flac", "mp3", "convert $source $destination")]);
        assert!(resolve(Utf8Path::new("/elsewhere/a.flac"), &config).is_none());
    }

    #[test]
    fn test_placeholders_in_any_order() {
        let config = config_with(&[("flac", "mp3", "convert $source $destination")]);
        let resolver = FormatResolver::new(&config);

        let command = resolver.render_command(
            "$destination <- $source ($source)",
            Utf8Path::new("/src/song"),
            Utf8Path::new("/dst/song"),
        );
        assert_eq!(command, r#""/dst/song" <- "/src/song" ("/src/song")"#);
    }

    #[cfg(unix)]
    #[test]
    fn test_placeholder_inside_path_is_not_substituted_again() {
        let config = config_with(&[("flac", "mp3", "convert $source $destination")]);

        let task = resolve(Utf8Path::new("/src/$destination/a.flac"), &config).unwrap();

        assert_eq!(
            task.command,
            r#"convert "/src/\$destination/a.flac" "/dst/\$destination/a.mp3""#
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_quote_path_escapes_shell_specials() {
        assert_eq!(quote_path(Utf8Path::new("/a b/c.flac")), r#""/a b/c.flac""#);
        assert_eq!(
            quote_path(Utf8Path::new(r#"/a/"$HOME"`x`.flac"#)),
            r#""/a/\"\$HOME\"\`x\`.flac""#
        );
    }
}
