use super::*;

/// 100-frame stereo file whose samples encode their own frame index:
/// left = index, right = -index (scaled to i16 range).
fn write_fixture(dir: &std::path::Path) -> std::path::PathBuf {
    let path = dir.join("tone.wav");
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 8_000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for frame in 0..100i16 {
        writer.write_sample(frame * 100).unwrap();
        writer.write_sample(-frame * 100).unwrap();
    }
    writer.finalize().unwrap();
    path
}

#[test]
fn test_metadata_columns() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let table = AudioTable::open(&path).unwrap();

    assert_eq!(table.num_fields(), 4);
    assert_eq!(table.column_name(0), "Title");
    assert_eq!(table.column_name(1), "Audio");
    assert_eq!(table.column_type(1), ColumnType::Vector);
    assert_eq!(table.column_type(2), ColumnType::Int);
    assert_eq!(table.key_type(), &[ColumnType::Int64]);
    assert!(table.has_human_readable_key());
    assert_eq!(table.num_frames(), 100);

    let mut cursor = table.seek_begin().unwrap().unwrap();
    assert_eq!(cursor.get_int(2, 0), 2);
    assert_eq!(cursor.get_int(3, 0), 8_000);
    assert_eq!(cursor.row_key(), Key::from_int(0));
}

#[test]
fn test_full_decode() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let table = AudioTable::open(&path).unwrap();

    let mut cursor = table.seek(&Key::from_int(0)).unwrap().unwrap();
    let samples = cursor.get_vector(1);
    assert_eq!(samples.len(), 200, "stereo frames are interleaved");
    assert_eq!(samples[0], 0.0);
    let expected = 100.0 / 32_768.0;
    assert!((samples[2] - expected).abs() < 1e-6, "frame 1 left channel");
    assert!((samples[3] + expected).abs() < 1e-6, "frame 1 right channel");
}

#[test]
fn test_frame_range_decode() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let table = AudioTable::open(&path).unwrap();

    let key = Key::concat(&[&Key::from_int(0), &Key::from_int(10), &Key::from_int(20)]);
    let mut cursor = table.seek(&key).unwrap().unwrap();
    assert_eq!(cursor.row_key(), key);

    let samples = cursor.get_vector(1);
    assert_eq!(samples.len(), 20, "10 stereo frames");
    let expected = 1_000.0 / 32_768.0;
    assert!((samples[0] - expected).abs() < 1e-6, "range starts at frame 10");

    assert!(cursor.get_vector(0).is_empty(), "non-vector column");
}

#[test]
fn test_single_row_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let table = AudioTable::open(&path).unwrap();

    let mut cursor = table.seek_begin().unwrap().unwrap();
    assert!(!cursor.is_null(1));
    assert!(!cursor.next().unwrap());
    assert!(cursor.is_null(1), "past-end cursor has no data");
    assert!(cursor.get_vector(1).is_empty());

    assert!(table.seek(&Key::from_int(3)).unwrap().is_none(), "unknown track");
}

#[test]
fn test_read_only_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());
    let table = AudioTable::open(&path).unwrap();

    assert_eq!(
        table.insert(&Key::from_int(0)).unwrap_err().kind(),
        ErrorKind::ReadOnly
    );
    assert_eq!(table.clear().unwrap_err().kind(), ErrorKind::ReadOnly);

    let mut cursor = table.seek_begin().unwrap().unwrap();
    assert_eq!(cursor.execute().unwrap_err().kind(), ErrorKind::ReadOnly);
    assert_eq!(
        cursor.set_text(0, "t", true).unwrap_err().kind(),
        ErrorKind::ReadOnly
    );
}
