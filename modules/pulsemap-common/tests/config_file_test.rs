use std::io::Write;

use pulsemap_common::{load_config, SimilarityStrategy};

fn write_config(content: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[test]
fn loads_full_config_file() {
    let file = write_config(
        r#"
        [clustering]
        merge_threshold = 0.4

        [hotspot]
        top_n = 10
        volume_ceiling = 500.0

        [hotspot.weights]
        volume = 0.5
        velocity = 0.25
        confidence = 0.25

        [flow]
        halflife_hours = 3.0
        heat_threshold = 0.6
        similarity = "label_overlap"

        [hex]
        intensity_threshold = 0.2
        max_resolution = 4
        default_resolution = 2
        "#,
    );

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.clustering.merge_threshold, 0.4);
    assert_eq!(config.hotspot.top_n, 10);
    assert_eq!(config.hotspot.weights.volume, 0.5);
    assert_eq!(config.flow.similarity, SimilarityStrategy::LabelOverlap);
    assert_eq!(config.hex.max_resolution, 4);
    assert_eq!(config.hex.clamp_resolution(6), 4);
}

#[test]
fn empty_file_yields_defaults() {
    let file = write_config("");
    let config = load_config(file.path()).unwrap();
    assert_eq!(config, pulsemap_common::EngineConfig::default());
}

#[test]
fn invalid_halflife_reports_file_path() {
    let file = write_config("[flow]\nhalflife_hours = 0.0\n");
    let err = load_config(file.path()).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("Invalid config file"), "got: {message}");
    assert!(message.contains("Halflife"), "got: {message}");
}

#[test]
fn missing_file_is_an_error() {
    let err = load_config(std::path::Path::new("/definitely/not/here.toml")).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to read config file"));
}
