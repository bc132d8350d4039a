use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};

mod common;
use common::Harness;

use cabin_voice::commands::{CommandTable, MatchOutcome};
use cabin_voice::core::text_normalizer::TextNormalizer;
use cabin_voice::engine::{Handled, HandlerSettings};
use cabin_voice::navigation::extract_destination;
use cabin_voice::protocol::{Frame, ServerResponse};

#[test]
fn test_random_bytes_never_panic_decoders() {
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);

    for _ in 0..2000 {
        let len = rng.gen_range(0..64);
        let mut data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        // Bias toward a valid header so the length/payload paths get exercised
        if rng.gen_bool(0.5) && data.len() >= 4 {
            data[0] = 0x11;
            data[1] = if rng.gen_bool(0.5) { 0x91 } else { 0xF0 };
            data[2] = if rng.gen_bool(0.5) { 0x11 } else { 0x10 };
        }
        let _ = Frame::decode(&data);
        let _ = ServerResponse::decode(&data);
    }
}

#[test]
fn test_truncated_and_lying_frames_rejected() {
    let response = ServerResponse {
        sequence: 3,
        body: serde_json::json!({ "result": { "text": "打开空调" } }),
    };
    let bytes = response.encode().unwrap();

    for cut in 0..bytes.len() {
        assert!(
            ServerResponse::decode(&bytes[..cut]).is_none(),
            "prefix of {} bytes decoded",
            cut
        );
    }

    // Declared payload length far past the end of the buffer
    let mut lying = bytes.clone();
    lying[8..12].copy_from_slice(&u32::MAX.to_be_bytes());
    assert!(ServerResponse::decode(&lying).is_none());

    // Gzip flag set but payload is not gzip
    let mut corrupt = bytes.clone();
    for b in corrupt.iter_mut().skip(12) {
        *b = 0xAA;
    }
    assert!(ServerResponse::decode(&corrupt).is_none());

    let decoded = ServerResponse::decode(&bytes).unwrap();
    assert_eq!(decoded.text(), Some("打开空调"));
}

#[test]
fn test_asr_flood_fuzz() {
    let h = Harness::with_settings(HandlerSettings {
        no_match_threshold: 1000,
        ..HandlerSettings::default()
    });

    // Simulate a flood of random garbage text
    let garbage = [
        "asdfghjkl",
        "!!! @@@ ###",
        "1234567890",
        "extremely long string that doesn't mean anything to the system at all but might be cut mid-character",
        "",
        " ",
        "。。。，，，！！！",
        "嗯嗯嗯啊啊啊",
        "\u{200b}\u{feff}",
    ];

    for text in garbage {
        let res = h.handler.handle_text(text);
        assert!(
            matches!(res, Handled::NoMatch { .. } | Handled::Ignored),
            "{:?} for '{}'",
            res,
            text
        );
    }
    assert!(h.sink.calls().is_empty());

    let mut rng = rand::rngs::StdRng::seed_from_u64(42);
    let start = Instant::now();
    for _ in 0..500 {
        let text: String = (0..rng.gen_range(0..80))
            .map(|_| char::from_u32(rng.gen_range(0x20..0x9FFF)).unwrap_or('?'))
            .collect();
        let _ = h.handler.handle_text(&text);
    }
    println!("Processed 500 utterances in {:?}", start.elapsed());

    // Stability check: the handler still works once any window has closed
    h.advance(Duration::from_secs(60));
    h.handler.reset_cycle(true);
    let res = h.handler.handle_text("关闭车窗");
    assert_eq!(res, Handled::Dispatched("window_close".to_string()));
}

#[test]
fn test_normalizer_respects_char_boundaries() {
    let normalizer = TextNormalizer::new(7);
    let mut rng = rand::rngs::StdRng::seed_from_u64(3);
    let alphabet: Vec<char> = "导航到天津站打开空调，。！ a1".chars().collect();

    for _ in 0..500 {
        let text: String = (0..rng.gen_range(0..40))
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        let out = normalizer.normalize(&text);
        assert!(out.chars().count() <= 7, "'{}' -> '{}'", text, out);
        assert_eq!(out, out.trim());
    }
}

#[test]
fn test_matcher_and_extractor_total_on_noise() {
    let table = CommandTable::default();
    let mut rng = rand::rngs::StdRng::seed_from_u64(11);
    let alphabet: Vec<char> = "导航到去前往我要出发天津站了吧呢啊 ".chars().collect();

    for _ in 0..500 {
        let text: String = (0..rng.gen_range(0..20))
            .map(|_| alphabet[rng.gen_range(0..alphabet.len())])
            .collect();
        if let MatchOutcome::Trigger(t) = table.classify(&text) {
            assert!(!t.trim().is_empty());
        }
        if let Some(dest) = extract_destination(&text, table.destination_patterns()) {
            assert!(!dest.is_empty());
            assert_eq!(dest, dest.trim());
            assert!(!dest.starts_with('到') && !dest.starts_with('去'));
        }
    }
}
