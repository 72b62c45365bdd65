use super::*;

use crate::compose::codec::MediaInfo;
use crate::foundation::core::{Canvas, Fps};
use crate::foundation::error::CompositionErrorKind;

fn temp_dir(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!(
        "glossreel_{name}_{}_{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ))
}

/// Media files are text manifests `WxH@fps[#codec];label`; anything else fails to probe.
///
/// The codec defaults to h264. A `corrupt` label probes fine but fails to decode, which breaks any
/// concat that includes it.
#[derive(Default)]
struct ManifestCodec {
    fail_concat: bool,
    concat_calls: std::sync::atomic::AtomicUsize,
}

impl ManifestCodec {
    fn failing_concat() -> Self {
        Self {
            fail_concat: true,
            ..Self::default()
        }
    }
}

fn read_manifest(path: &Path) -> Result<(MediaInfo, String), CompositionError> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| CompositionError::decode_failure(e.to_string()))?;
    let bad = || CompositionError::decode_failure(format!("not a manifest: {text}"));
    let (geom, label) = text.split_once(';').ok_or_else(bad)?;
    let (geom, codec) = geom.split_once('#').unwrap_or((geom, "h264"));
    let (size, fps) = geom.split_once('@').ok_or_else(bad)?;
    let (w, h) = size.split_once('x').ok_or_else(bad)?;
    let info = MediaInfo {
        canvas: Canvas {
            width: w.parse().map_err(|_| bad())?,
            height: h.parse().map_err(|_| bad())?,
        },
        fps: Fps::parse_ratio(fps).map_err(|_| bad())?,
        duration_secs: Some(1.0),
        codec: Some(codec.to_string()),
        pix_fmt: Some("yuv420p".to_string()),
        has_audio: false,
    };
    Ok((info, label.to_string()))
}

impl Codec for ManifestCodec {
    fn probe(&self, path: &Path) -> Result<MediaInfo, CompositionError> {
        read_manifest(path).map(|(info, _)| info)
    }

    fn normalize(
        &self,
        src: &Path,
        dst: &Path,
        format: &OutputFormat,
    ) -> Result<(), CompositionError> {
        let (_, label) = read_manifest(src)?;
        let body = format!(
            "{}x{}@{};{label}",
            format.canvas.width, format.canvas.height, format.fps
        );
        std::fs::write(dst, body).map_err(|e| CompositionError::write_failure(e.to_string()))
    }

    fn verify(&self, path: &Path) -> Result<(), CompositionError> {
        let (_, label) = read_manifest(path)?;
        if label == "corrupt" {
            return Err(CompositionError::decode_failure("invalid NAL unit"));
        }
        Ok(())
    }

    fn concat(
        &self,
        inputs: &[PathBuf],
        dst: &Path,
        _format: &OutputFormat,
    ) -> Result<(), CompositionError> {
        self.concat_calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        std::fs::write(dst, b"partial").map_err(|e| CompositionError::write_failure(e.to_string()))?;
        if self.fail_concat {
            return Err(CompositionError::write_failure("disk full"));
        }
        let mut lines = Vec::new();
        for p in inputs {
            let line = std::fs::read_to_string(p)
                .map_err(|e| CompositionError::write_failure(e.to_string()))?;
            if line.ends_with(";corrupt") {
                return Err(CompositionError::write_failure(format!(
                    "error while decoding {}",
                    p.display()
                )));
            }
            lines.push(line);
        }
        std::fs::write(dst, lines.join("\n"))
            .map_err(|e| CompositionError::write_failure(e.to_string()))
    }
}

fn spec_from(dir: &Path, items: &[(&str, &str)]) -> CompositionSpec {
    std::fs::create_dir_all(dir).unwrap();
    let mut spec = CompositionSpec::new();
    for (i, (token, body)) in items.iter().enumerate() {
        let p = dir.join(format!("{i}.media"));
        std::fs::write(&p, body).unwrap();
        spec.push(Token::new(token).unwrap(), p);
    }
    spec
}

fn composer(out: &Path, codec: ManifestCodec) -> Composer {
    Composer::new(Arc::new(codec), OutputFormat::default(), out)
}

fn dir_entries(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn empty_spec_is_no_input() {
    let root = temp_dir("compose_empty");
    let err = composer(&root, ManifestCodec::default())
        .compose(&CompositionSpec::new())
        .unwrap_err();
    assert_eq!(err.kind, CompositionErrorKind::NoInput);
}

#[test]
fn concatenates_in_order_and_normalizes_only_when_needed() {
    let root = temp_dir("compose_order");
    let spec = spec_from(
        &root.join("in"),
        &[
            ("C", "1280x720@25;c"),
            ("A", "640x480@30000/1001;a"),
            ("B", "1280x720@25/1;b"),
        ],
    );
    let out_dir = root.join("out");
    let out = composer(&out_dir, ManifestCodec::default())
        .compose(&spec)
        .unwrap();

    let body = std::fs::read_to_string(&out.path).unwrap();
    assert_eq!(body, "1280x720@25;c\n1280x720@25;a\n1280x720@25/1;b");
    let normalized: Vec<bool> = out.segments.iter().map(|s| s.normalized).collect();
    assert_eq!(normalized, vec![false, true, false]);
    assert_eq!(out.duration_secs(), Some(3.0));
    let tokens: Vec<&str> = out.segments.iter().map(|s| s.token.as_str()).collect();
    assert_eq!(tokens, vec!["C", "A", "B"]);
    assert!(out.skipped.is_empty());

    let name = out.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("sign_C_A_B_"), "{name}");
    assert!(name.ends_with(".mp4"));
    // Scratch directory and temp artifact are gone.
    assert_eq!(dir_entries(&out_dir), vec![name]);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn undecodable_items_are_skipped() {
    let root = temp_dir("compose_skip");
    let spec = spec_from(
        &root.join("in"),
        &[("A", "1280x720@25;a"), ("B", "garbage"), ("C", "1280x720@25;c")],
    );
    let out = composer(&root.join("out"), ManifestCodec::default())
        .compose(&spec)
        .unwrap();

    assert_eq!(out.segments.len(), 2);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].index, 1);
    assert_eq!(out.skipped[0].token.as_str(), "B");
    assert_eq!(
        std::fs::read_to_string(&out.path).unwrap(),
        "1280x720@25;a\n1280x720@25;c"
    );
    let name = out.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("sign_A_C_"), "{name}");

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn all_items_failing_is_decode_failure() {
    let root = temp_dir("compose_all_bad");
    let spec = spec_from(&root.join("in"), &[("A", "x"), ("B", "y")]);
    let out_dir = root.join("out");
    let err = composer(&out_dir, ManifestCodec::default())
        .compose(&spec)
        .unwrap_err();
    assert_eq!(err.kind, CompositionErrorKind::DecodeFailure);
    assert!(dir_entries(&out_dir).is_empty());

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn concat_failure_is_write_failure_and_leaves_nothing_behind() {
    let root = temp_dir("compose_write_fail");
    let spec = spec_from(&root.join("in"), &[("A", "1280x720@25;a")]);
    let out_dir = root.join("out");
    let err = composer(&out_dir, ManifestCodec::failing_concat())
        .compose(&spec)
        .unwrap_err();
    assert_eq!(err.kind, CompositionErrorKind::WriteFailure);
    assert!(dir_entries(&out_dir).is_empty());

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn conforming_sources_in_another_codec_are_reencoded() {
    let root = temp_dir("compose_codec");
    let spec = spec_from(
        &root.join("in"),
        &[("A", "1280x720@25;a"), ("B", "1280x720@25#vp9;b")],
    );
    let out = composer(&root.join("out"), ManifestCodec::default())
        .compose(&spec)
        .unwrap();

    let normalized: Vec<bool> = out.segments.iter().map(|s| s.normalized).collect();
    assert_eq!(normalized, vec![false, true]);
    assert_eq!(
        std::fs::read_to_string(&out.path).unwrap(),
        "1280x720@25;a\n1280x720@25;b"
    );

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn item_that_breaks_the_concat_is_skipped_and_the_rest_joined() {
    let root = temp_dir("compose_concat_decode");
    let spec = spec_from(
        &root.join("in"),
        &[
            ("A", "1280x720@25;a"),
            ("B", "1280x720@25;corrupt"),
            ("C", "640x480@25;c"),
        ],
    );
    let out_dir = root.join("out");
    let codec = Arc::new(ManifestCodec::default());
    let out = Composer::new(codec.clone(), OutputFormat::default(), &out_dir)
        .compose(&spec)
        .unwrap();

    assert_eq!(codec.concat_calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    let tokens: Vec<&str> = out.segments.iter().map(|s| s.token.as_str()).collect();
    assert_eq!(tokens, vec!["A", "C"]);
    assert_eq!(out.skipped.len(), 1);
    assert_eq!(out.skipped[0].index, 1);
    assert_eq!(out.skipped[0].token.as_str(), "B");
    assert_eq!(out.skipped[0].reason, "invalid NAL unit");
    assert_eq!(
        std::fs::read_to_string(&out.path).unwrap(),
        "1280x720@25;a\n1280x720@25;c"
    );
    assert_eq!(out.duration_secs(), Some(2.0));
    let name = out.path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("sign_A_C_"), "{name}");
    assert_eq!(dir_entries(&out_dir), vec![name]);

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn concat_of_only_broken_items_is_decode_failure() {
    let root = temp_dir("compose_concat_all_bad");
    let spec = spec_from(
        &root.join("in"),
        &[("A", "1280x720@25;corrupt"), ("B", "1280x720@25;corrupt")],
    );
    let out_dir = root.join("out");
    let err = composer(&out_dir, ManifestCodec::default())
        .compose(&spec)
        .unwrap_err();
    assert_eq!(err.kind, CompositionErrorKind::DecodeFailure);
    assert!(dir_entries(&out_dir).is_empty());

    std::fs::remove_dir_all(&root).ok();
}

#[test]
fn unknown_segment_length_leaves_the_total_unknown() {
    let segment = |duration_secs| Segment {
        token: Token::new("A").unwrap(),
        source: PathBuf::from("a.mp4"),
        normalized: false,
        duration_secs,
    };
    let mut out = CompositionOutput {
        path: PathBuf::from("out.mp4"),
        segments: vec![segment(Some(1.5)), segment(Some(0.5))],
        skipped: Vec::new(),
    };
    assert_eq!(out.duration_secs(), Some(2.0));
    out.segments.push(segment(None));
    assert_eq!(out.duration_secs(), None);
}

#[test]
fn repeated_compositions_never_overwrite() {
    let root = temp_dir("compose_unique");
    let spec = spec_from(&root.join("in"), &[("A", "1280x720@25;a")]);
    let c = composer(&root.join("out"), ManifestCodec::default());
    let first = c.compose(&spec).unwrap();
    let second = c.compose(&spec).unwrap();
    assert_ne!(first.path, second.path);
    assert!(first.path.exists() && second.path.exists());

    std::fs::remove_dir_all(&root).ok();
}

fn stamp() -> NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
        .unwrap()
        .and_hms_opt(3, 4, 5)
        .unwrap()
}

fn tokens(raw: &[&str]) -> Vec<Token> {
    Token::parse_all(raw).unwrap()
}

#[test]
fn file_name_for_short_sequences() {
    assert_eq!(
        output_file_name(&tokens(&["HELLO", "WORLD"]), stamp(), 5, 50),
        "sign_HELLO_WORLD_20240102_030405.mp4"
    );
    assert_eq!(
        output_file_name(&[], stamp(), 5, 50),
        "sign_empty_sequence_20240102_030405.mp4"
    );
    assert_eq!(
        output_file_name(&tokens(&["I'M", "NEW-YORK"]), stamp(), 5, 50),
        "sign_I_M_NEW_YORK_20240102_030405.mp4"
    );
}

#[test]
fn file_name_truncation_appends_a_stable_hash() {
    let seven = tokens(&["A", "B", "C", "D", "E", "F", "G"]);
    let name = output_file_name(&seven, stamp(), 5, 50);
    assert!(name.starts_with("sign_A_B_C_D_E_h"), "{name}");
    assert!(name.ends_with("_20240102_030405.mp4"));
    assert_eq!(name, output_file_name(&seven, stamp(), 5, 50));

    let other = tokens(&["A", "B", "C", "D", "E", "F", "H"]);
    assert_ne!(name, output_file_name(&other, stamp(), 5, 50));

    let long = tokens(&["ABCDEFGHIJKLMNOPQRSTUVWXYZ", "ABCDEFGHIJKLMNOPQRSTUVWXYZ"]);
    let name = output_file_name(&long, stamp(), 5, 50);
    let stem = name
        .strip_prefix("sign_")
        .unwrap()
        .strip_suffix("_20240102_030405.mp4")
        .unwrap();
    let (kept, hash) = stem.rsplit_once("_h").unwrap();
    assert_eq!(kept.len(), 50);
    assert_eq!(hash.len(), 8);
    assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
}
