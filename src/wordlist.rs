//! Recovery-word generation
//!
//! New accounts get five short unique words as a fallback credential for
//! when hardware binding fails. Only the per-word hashes ever reach the
//! node; the plain words stay with the client.

use rand::seq::SliceRandom;

pub const WORD_COUNT: usize = 5;

/// Short everyday words, all six letters or fewer so users can copy them by
/// hand onto paper.
static WORDS: &[&str] = &[
    "acorn", "amber", "anchor", "apple", "arrow", "badge", "basil", "beach", "berry", "birch",
    "blaze", "book", "bread", "brick", "brook", "candle", "canoe", "cedar", "chalk", "cherry",
    "cliff", "cloud", "clover", "coral", "crane", "creek", "crow", "dawn", "delta", "dew",
    "drum", "dune", "eagle", "echo", "elm", "ember", "fable", "falcon", "fern", "field",
    "flame", "flint", "fog", "forge", "fox", "frost", "gale", "garnet", "glade", "grain",
    "grove", "harbor", "hawk", "hazel", "heron", "hill", "honey", "ivy", "jade", "kelp",
    "lagoon", "lark", "lichen", "linen", "lotus", "maple", "marsh", "meadow", "mist", "moss",
    "newt", "north", "oak", "ocean", "olive", "onyx", "opal", "otter", "pear", "pebble",
    "pine", "plume", "pond", "quartz", "quill", "rain", "reed", "ridge", "river", "robin",
    "rose", "sage", "shell", "slate", "spruce", "stone", "storm", "swan", "thorn", "tide",
    "torch", "trout", "tulip", "vale", "walnut", "wren",
];

/// Draw [`WORD_COUNT`] distinct words.
pub fn generate() -> Vec<String> {
    let mut rng = rand::thread_rng();
    WORDS
        .choose_multiple(&mut rng, WORD_COUNT)
        .map(|word| word.to_string())
        .collect()
}
