//! Property-based tests for the position model and marked sources
//!
//! Texts are built from a small alphabet that mixes every supported line
//! terminator with single- and multi-byte characters.

use grammarlab_core::marks::MarkedSourceBuilder;
use grammarlab_core::source::{Position, Source, TextSpan};
use proptest::prelude::*;
use std::sync::Arc;

fn text_strategy() -> impl Strategy<Value = String> {
    let pieces = prop::sample::select(vec![
        "a", "b", "xyz", " ", "é", "\r\n", "\r", "\n", "\u{2028}", "\u{2029}",
    ]);
    prop::collection::vec(pieces, 0..40).prop_map(|pieces| pieces.concat())
}

/// Every coordinate a source can address, in offset order
fn all_positions(source: &Source) -> Vec<Position> {
    (0..=source.len())
        .map(|offset| source.position_to_line_column(offset))
        .collect()
}

proptest! {
    #[test]
    fn line_column_round_trip(text in text_strategy()) {
        let source = Source::new("prop.txt", text);
        for (offset, position) in all_positions(&source).into_iter().enumerate() {
            let back = source.line_column_to_position(position.line, position.column);
            prop_assert_eq!(back, offset);
            prop_assert_eq!(source.position_to_line_column(back), position);
            prop_assert_eq!(source.checked_position(position.line, position.column), Some(offset));
        }
    }

    #[test]
    fn line_column_is_monotonic(text in text_strategy()) {
        let source = Source::new("prop.txt", text);
        let positions = all_positions(&source);
        for pair in positions.windows(2) {
            prop_assert!(pair[0] <= pair[1], "{} then {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn crlf_is_one_terminator(lines in prop::collection::vec("[a-z]{0,5}", 1..10)) {
        let source = Source::new("prop.txt", lines.join("\r\n"));
        prop_assert_eq!(source.line_count(), lines.len());
    }

    #[test]
    fn marks_before_offset_are_skipped(
        text in "[a-z\n]{1,60}",
        mark_length in 1usize..8,
        seeds in prop::collection::vec(any::<prop::sample::Index>(), 0..6),
        target in any::<prop::sample::Index>(),
        length in any::<prop::sample::Index>(),
    ) {
        let original = Source::shared("G.g4", text);
        let x = target.index(original.len() + 1);
        let len = length.index(original.len() - x + 1);

        let mut offsets: Vec<usize> = seeds.iter().map(|seed| seed.index(x + 1)).collect();
        offsets.sort_unstable();

        let mark = "#".repeat(mark_length);
        let mut builder = MarkedSourceBuilder::new(Arc::clone(&original), mark_length);
        for &offset in &offsets {
            builder.insert(offset, &mark).unwrap();
        }
        let marked = builder.finish("G.g4");
        let k = offsets.len();

        prop_assert_eq!(marked.source().len(), original.len() + k * mark_length);
        prop_assert_eq!(
            marked.original_text_span(x + k * mark_length, len),
            TextSpan::new(x, len, Arc::clone(&original))
        );
    }
}
