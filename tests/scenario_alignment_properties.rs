//! Alignment properties over in-memory sessions
//!
//! GREEN when:
//! - Epoch seconds and epoch milliseconds describing the same moment land on
//!   the same axis instant.
//! - Duplicate timestamps survive ingest in arrival order.
//! - Interpolated values are exact at the midpoint and never extrapolated.
//! - Queries page through the timeline in order without losing frames.

use serde_json::json;
use std::collections::BTreeMap;

use synheart_sync::pipeline::SessionProcessor;
use synheart_sync::source::MemorySource;
use synheart_sync::{
    align, ingest, CancelToken, Instant, Provenance, RangeQuery, StreamKind, StreamSeries, SyncConfig,
};

const START_S: i64 = 1_710_489_600;

fn series_of(kind: StreamKind, values: Vec<serde_json::Value>) -> StreamSeries {
    let report = ingest(kind, values.into_iter().map(|v| synheart_sync::RawRecord::from_value(kind, v)));
    assert!(report.is_lossless());
    report.into_series(2.0).0
}

#[test]
fn seconds_and_millis_share_an_instant() {
    let spo2 = series_of(
        StreamKind::BloodOxygen,
        vec![json!({ "time": START_S, "spo2": 97, "pulse_quality": "good" })],
    );
    let movement = series_of(
        StreamKind::Movement,
        vec![json!({ "ts": START_S * 1_000, "x": 0.0, "y": 0.0, "z": 1.0, "magnitude": 1.0 })],
    );

    assert_eq!(spo2.first_instant(), movement.first_instant());

    let streams: BTreeMap<_, _> = [(StreamKind::BloodOxygen, spo2), (StreamKind::Movement, movement)]
        .into_iter()
        .collect();
    let frames = align(&streams, &SyncConfig::union_axis()).unwrap();

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].instant, Instant::from_millis(START_S * 1_000));
    assert!(frames[0].cells.values().all(|cell| cell.provenance == Provenance::Real));
}

#[test]
fn duplicate_timestamps_are_preserved() {
    let hr = series_of(
        StreamKind::HeartRate,
        vec![
            json!({ "timestamp": "2024-03-15T08:00:01+00:00", "bpm": 80, "confidence": 0.9 }),
            json!({ "timestamp": "2024-03-15T08:00:00+00:00", "bpm": 70, "confidence": 0.9 }),
            json!({ "timestamp": "2024-03-15T08:00:01+00:00", "bpm": 90, "confidence": 0.9 }),
        ],
    );

    let bpm: Vec<f64> = hr.samples().iter().filter_map(|s| s.value_f64("bpm")).collect();
    assert_eq!(bpm, vec![70.0, 80.0, 90.0]);

    // Both duplicates feed the anchor cell at 08:00:01
    let streams: BTreeMap<_, _> = [(StreamKind::HeartRate, hr)].into_iter().collect();
    let frames = align(&streams, &SyncConfig::default()).unwrap();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[1].cell(StreamKind::HeartRate).unwrap().value_f64("bpm"), Some(85.0));
}

#[test]
fn interpolation_is_exact_and_bounded() {
    let hr = series_of(
        StreamKind::HeartRate,
        (0..=20)
            .map(|s| json!({ "timestamp": format!("2024-03-15T08:00:{s:02}+00:00"), "bpm": 70, "confidence": 0.9 }))
            .collect(),
    );
    let temp = series_of(
        StreamKind::SkinTemperature,
        vec![
            json!({ "recorded_at": "2024-03-15T03:00:05-05:00", "temp_celsius": 36.0 }),
            json!({ "recorded_at": "2024-03-15T03:00:15-05:00", "temp_celsius": 37.0 }),
        ],
    );

    let streams: BTreeMap<_, _> = [(StreamKind::HeartRate, hr), (StreamKind::SkinTemperature, temp)]
        .into_iter()
        .collect();
    let frames = align(&streams, &SyncConfig::default()).unwrap();
    assert_eq!(frames.len(), 21);

    for (second, frame) in frames.iter().enumerate() {
        let cell = frame.cell(StreamKind::SkinTemperature).unwrap();
        match second {
            0..=4 | 16..=20 => assert!(cell.is_missing(), "extrapolated at {second}s"),
            5 | 15 => assert_eq!(cell.provenance, Provenance::Real),
            10 => {
                assert_eq!(cell.provenance, Provenance::Interpolated);
                assert_eq!(cell.value_f64("temp_celsius"), Some(36.5));
            }
            _ => assert_eq!(cell.provenance, Provenance::Interpolated),
        }
    }
}

#[test]
fn pages_cover_the_timeline_in_order() {
    let hr = MemorySource::from_values(
        StreamKind::HeartRate,
        (0..45).map(|s| {
            json!({
                "timestamp": format!("2024-03-15T08:{:02}:{:02}+00:00", s / 60, s % 60),
                "bpm": 60 + s,
                "confidence": 0.95,
            })
        }),
    );
    let load = MemorySource::from_values(
        StreamKind::Load,
        (0..10).map(|i| {
            json!({
                "timestamp": format!("2024/03/15 08:00:{:02}", i * 5),
                "load_score": 10.0 * i as f64,
                "activity_type": "walking",
                "hr_derived": false,
            })
        }),
    );

    let processor = SessionProcessor::new(SyncConfig::default()).unwrap();
    let sources: Vec<Box<dyn synheart_sync::RecordSource>> = vec![Box::new(hr), Box::new(load)];
    let timeline = processor.process(&sources, &CancelToken::new()).unwrap();

    let query = RangeQuery::all().with_streams([StreamKind::Load]);
    let pages: Vec<_> = timeline.index.pages(&query, 20).collect();
    assert_eq!(pages.iter().map(|p| p.frames.len()).collect::<Vec<_>>(), vec![20, 20, 5]);

    let instants: Vec<Instant> = pages.iter().flat_map(|p| p.frames.iter().map(|f| f.instant)).collect();
    assert!(instants.windows(2).all(|pair| pair[0] < pair[1]));
    assert!(pages
        .iter()
        .flat_map(|p| &p.frames)
        .all(|f| f.cells.keys().eq([StreamKind::Load].iter())));

    // Load outlasts heart rate, so every anchor instant has a load value
    let summary = timeline.index.summarize(&query);
    let load = &summary.streams[&StreamKind::Load];
    assert_eq!(load.missing, 0);
    assert_eq!(load.real, 9);
    assert_eq!(load.completeness, 100.0);
    let max = load.fields["load_score"].max.unwrap();
    assert!((max - 88.0).abs() < 1e-9, "got {max}");
}
