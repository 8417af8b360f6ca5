//! Integration and property tests for FormatResolver
//!
//! These tests verify:
//! - Destination paths mirror the source tree with the target extension
//! - The longest matching registered extension wins
//! - Command rendering is deterministic and quotes both paths

use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use music_sync::services::{FormatResolver, resolve};
use music_sync::{FormatRule, SyncConfig};
use proptest::prelude::*;

fn config_with(rules: &[(&str, &str, &str)]) -> SyncConfig {
    let mut formats = IndexMap::new();
    for (extension, convert_to, command) in rules {
        formats.insert(extension.to_string(), FormatRule::new(*convert_to, *command));
    }
    SyncConfig::new("/src", "/dst", 2, formats)
}

#[test]
fn test_resolve_maps_into_destination_tree() {
    let config = config_with(&[("flac", "mp3", "ffmpeg -i $source $destination")]);

    let task = resolve(Utf8Path::new("/src/artist/album/track.flac"), &config).unwrap();

    assert_eq!(task.extension, "flac");
    assert_eq!(task.destination_path.as_str(), "/dst/artist/album/track.mp3");
    assert_eq!(
        task.command,
        r#"ffmpeg -i "/src/artist/album/track.flac" "/dst/artist/album/track.mp3""#
    );
}

#[test]
fn test_untracked_extension_is_ignored() {
    let config = config_with(&[("flac", "mp3", "x $source $destination")]);

    assert!(resolve(Utf8Path::new("/src/cover.jpg"), &config).is_none());
    assert!(resolve(Utf8Path::new("/src/noextension"), &config).is_none());
    // Extension must follow a dot
    assert!(resolve(Utf8Path::new("/src/notflac"), &config).is_none());
}

#[test]
fn test_matching_is_case_sensitive() {
    let config = config_with(&[("flac", "mp3", "x $source $destination")]);

    assert!(resolve(Utf8Path::new("/src/LOUD.FLAC"), &config).is_none());
}

#[test]
fn test_longest_extension_wins() {
    let config = config_with(&[
        ("gz", "unzipped", "gunzip $source $destination"),
        ("tar.gz", "tar", "untar $source $destination"),
    ]);
    let resolver = FormatResolver::new(&config);

    let task = resolver.resolve(Utf8Path::new("/src/backup.tar.gz")).unwrap();
    assert_eq!(task.extension, "tar.gz");
    assert_eq!(task.destination_path.as_str(), "/dst/backup.tar");

    let task = resolver.resolve(Utf8Path::new("/src/notes.gz")).unwrap();
    assert_eq!(task.extension, "gz");
    assert_eq!(task.destination_path.as_str(), "/dst/notes.unzipped");
}

#[test]
fn test_file_outside_source_root_is_ignored() {
    let config = config_with(&[("flac", "mp3", "x $source $destination")]);

    assert!(resolve(Utf8Path::new("/elsewhere/a.flac"), &config).is_none());
}

#[test]
fn test_placeholders_may_repeat() {
    let config = config_with(&[("wav", "wav", "cp $source $destination && touch $destination")]);

    let task = resolve(Utf8Path::new("/src/a.wav"), &config).unwrap();

    assert_eq!(
        task.command,
        r#"cp "/src/a.wav" "/dst/a.wav" && touch "/dst/a.wav""#
    );
}

#[test]
fn test_accessors_expose_roots() {
    let resolver = FormatResolver::new(&config_with(&[]));

    assert_eq!(resolver.source_root().as_str(), "/src");
    assert_eq!(resolver.destination_root().as_str(), "/dst");
    assert!(resolver.match_format("a.flac").is_none());
}

proptest! {
    #[test]
    fn test_destination_mirrors_relative_path(
        dirs in proptest::collection::vec("[a-zA-Z0-9 _-]{1,12}", 0..4),
        stem in "[a-zA-Z0-9 _-]{1,16}",
    ) {
        let config = config_with(&[("flac", "mp3", "x $source $destination")]);
        let relative: Utf8PathBuf = dirs.iter().collect();
        let source = Utf8Path::new("/src").join(&relative).join(format!("{}.flac", stem));

        let task = resolve(&source, &config).unwrap();

        let expected = Utf8Path::new("/dst").join(&relative).join(format!("{}.mp3", stem));
        prop_assert_eq!(&task.destination_path, &expected);
        prop_assert!(task.destination_path.starts_with("/dst"));
    }

    #[test]
    fn test_resolution_is_deterministic(
        stem in "[a-zA-Z0-9 ._-]{1,16}",
        extension in prop_oneof!["flac", "wav", "txt", "mp3"],
    ) {
        let config = config_with(&[
            ("flac", "mp3", "ffmpeg -i $source $destination"),
            ("wav", "ogg", "oggenc $source -o $destination"),
        ]);
        let resolver = FormatResolver::new(&config);
        let source = Utf8PathBuf::from(format!("/src/{}.{}", stem, extension));

        let first = resolver.resolve(&source);
        let second = resolve(&source, &config);
        prop_assert_eq!(&first, &second);

        let tracked = extension == "flac" || extension == "wav";
        prop_assert_eq!(first.is_some(), tracked);
    }

    #[test]
    fn test_rendered_command_has_no_bare_placeholders(
        name in "[a-zA-Z0-9 _-]{1,16}",
    ) {
        let config = config_with(&[("flac", "mp3", "x $source $destination")]);
        let task = resolve(&Utf8PathBuf::from(format!("/src/{}.flac", name)), &config).unwrap();

        prop_assert!(!task.command.contains("$source"));
        prop_assert!(!task.command.contains("$destination"));
        prop_assert!(task.command.starts_with("x \"/src/"));
    }
}
