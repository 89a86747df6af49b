//! Property tests for vocabulary-constrained generation.
//!
//! Whatever the backend writes, accepted content only uses units the learner
//! knows (plus the target word), in every script: Han, kana, Latin words and
//! Hangul. No request makes more than three backend calls.

mod common;

use std::collections::HashSet;
use std::iter::once;
use std::sync::Arc;

use chrono::Utc;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use serde_json::json;

use common::{test_generation_config, ScriptedGenerator};
use danci_practice::db::operations::Concept;
use danci_practice::services::generator::{
    ContentGenerator, GenerationError, GenerationTarget, MAX_ATTEMPTS,
};
use danci_practice::services::vocabulary::KnownVocabularySet;
use danci_practice::{Language, QuestionType};

/// One target word and the pieces generated sentences are built from.
struct Case {
    language: Language,
    target: &'static str,
    reading: &'static str,
    pool: &'static [&'static str],
    separator: &'static str,
}

const CHINESE: Case = Case {
    language: Language::Chinese,
    target: "猫",
    reading: "māo",
    pool: &[
        "我", "你", "他", "是", "有", "狗", "学", "生", "好", "不", "的", "吃", "水", "书", "cat",
        "ねこ", "고양이",
    ],
    separator: "",
};

const JAPANESE: Case = Case {
    language: Language::Japanese,
    target: "猫",
    reading: "ねこ",
    pool: &[
        "学生", "先生", "は", "です", "か", "ネコ", "たべもの", "を", "かいました", "犬", "cat",
        "고양이",
    ],
    separator: "",
};

const ENGLISH: Case = Case {
    language: Language::English,
    target: "cat",
    reading: "",
    pool: &[
        "I", "you", "have", "a", "the", "dog", "sees", "Cats", "don't", "猫", "ねこ", "고양이",
    ],
    separator: " ",
};

fn target_concept(case: &Case) -> Concept {
    Concept {
        id: "c-target".to_string(),
        user_id: "u1".to_string(),
        language: case.language,
        surface: case.target.to_string(),
        reading: case.reading.to_string(),
        meaning: "cat".to_string(),
        part_of_speech: "noun".to_string(),
        explanations: Vec::new(),
        understanding: 0,
        paused: false,
        created_at: Utc::now(),
    }
}

fn arb_sentence(case: &'static Case) -> impl Strategy<Value = String> {
    (
        prop::collection::vec(prop::sample::select(case.pool), 0..6),
        any::<bool>(),
        prop::sample::select(vec!["。", "？", "！", " 42", " 🐱"]),
    )
        .prop_map(move |(words, with_target, tail)| {
            let mut words: Vec<&str> = words;
            if with_target {
                words.push(case.target);
            }
            let mut sentence = words.join(case.separator);
            sentence.push_str(tail);
            sentence
        })
}

fn arb_reply(case: &'static Case) -> impl Strategy<Value = String> {
    prop::collection::vec((arb_sentence(case), arb_sentence(case)), 1..4).prop_map(|variants| {
        let variants: Vec<_> = variants
            .into_iter()
            .map(|(question, explanation)| {
                json!({ "question": question, "answer": true, "explanation": explanation })
            })
            .collect();
        json!({ "variants": variants }).to_string()
    })
}

fn arb_known(case: &'static Case) -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(case.pool.to_vec(), 0..=case.pool.len())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("runtime")
}

fn learner_words<'a>(case: &'a Case, known: &'a [&'a str]) -> impl Iterator<Item = &'a str> {
    known.iter().copied().chain(once(case.target))
}

/// Runs one generation against scripted replies and checks whatever comes
/// back against the learner's vocabulary.
fn check_generation(
    case: &'static Case,
    known: &[&str],
    replies: &[String],
) -> Result<(), TestCaseError> {
    let backend = ScriptedGenerator::new();
    for reply in replies {
        backend.reply(reply.clone());
    }
    let generator = ContentGenerator::new(backend.clone(), test_generation_config());
    let concept = target_concept(case);
    let known_set = KnownVocabularySet::from_pairs(known.iter().map(|w| (w.to_string(), 50)));
    let target = GenerationTarget {
        concept: &concept,
        known: &known_set,
        distractors: &[],
    };

    let result = runtime().block_on(generator.generate_question(&target, QuestionType::YesNo));

    let units: HashSet<String> = learner_words(case, known)
        .flat_map(|word| case.language.checked_units(word))
        .collect();
    let letters: HashSet<char> = learner_words(case, known)
        .flat_map(str::chars)
        .flat_map(char::to_lowercase)
        .collect();

    match result {
        Ok(question) => {
            for text in [&question.question, &question.explanation] {
                for unit in case.language.checked_units(text) {
                    prop_assert!(units.contains(&unit), "unknown unit {unit} in {text}");
                }
                for c in text.chars().filter(|c| c.is_alphabetic()) {
                    prop_assert!(
                        c.to_lowercase().all(|lower| letters.contains(&lower)),
                        "unknown letter {c} in {text}"
                    );
                }
            }
        }
        Err(e) => {
            prop_assert_eq!(backend.calls(), MAX_ATTEMPTS as usize);
            for token in e.illegal_tokens() {
                prop_assert!(!units.contains(token), "known unit {token} reported illegal");
            }
        }
    }
    prop_assert!(backend.calls() <= MAX_ATTEMPTS as usize);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(96))]

    #[test]
    fn prop_chinese_content_uses_only_known_units(
        known in arb_known(&CHINESE),
        replies in prop::collection::vec(arb_reply(&CHINESE), 1..=4),
    ) {
        check_generation(&CHINESE, &known, &replies)?;
    }

    #[test]
    fn prop_japanese_content_uses_only_known_units(
        known in arb_known(&JAPANESE),
        replies in prop::collection::vec(arb_reply(&JAPANESE), 1..=4),
    ) {
        check_generation(&JAPANESE, &known, &replies)?;
    }

    #[test]
    fn prop_english_content_uses_only_known_units(
        known in arb_known(&ENGLISH),
        replies in prop::collection::vec(arb_reply(&ENGLISH), 1..=4),
    ) {
        check_generation(&ENGLISH, &known, &replies)?;
    }
}

#[test]
fn unknown_kana_words_are_rejected() {
    let backend = ScriptedGenerator::new();
    backend.reply(r#"{"variants":[{"question":"ネコはぜんぜんちがうどうぶつですか？","answer":true}]}"#);
    backend.reply(r#"{"variants":[{"question":"たべものをかいましたか","answer":false}]}"#);
    backend.reply(r#"{"variants":[{"question":"ネコは学生ですか？","answer":false}]}"#);

    let generator = ContentGenerator::new(backend.clone(), test_generation_config());
    let concept = target_concept(&JAPANESE);
    let known = KnownVocabularySet::from_pairs([("学生", 80)]);
    let target = GenerationTarget {
        concept: &concept,
        known: &known,
        distractors: &[],
    };

    let err = runtime()
        .block_on(generator.generate_question(&target, QuestionType::YesNo))
        .unwrap_err();
    assert!(matches!(err, GenerationError::Exhausted { .. }));
    assert_eq!(backend.calls(), MAX_ATTEMPTS as usize);
    for kana in ["ネ", "コ", "た", "べ", "で", "す"] {
        assert!(err.illegal_tokens().iter().any(|t| t == kana), "{kana} not reported");
    }
}

#[test]
fn known_kana_words_are_accepted() {
    let backend = ScriptedGenerator::new();
    backend.reply(r#"{"variants":[{"question":"猫は学生ですか？","answer":false}]}"#);

    let generator = ContentGenerator::new(backend.clone(), test_generation_config());
    let concept = target_concept(&JAPANESE);
    let known = KnownVocabularySet::from_pairs([("学生", 80), ("は", 80), ("です", 80), ("か", 80)]);
    let target = GenerationTarget {
        concept: &concept,
        known: &known,
        distractors: &[],
    };

    let question = runtime()
        .block_on(generator.generate_question(&target, QuestionType::YesNo))
        .expect("every unit is known");
    assert_eq!(question.question, "猫は学生ですか？");
    assert_eq!(question.answer, "no");
    assert_eq!(backend.calls(), 1);
}

#[test]
fn retry_prompt_lists_rejected_characters() {
    let backend = ScriptedGenerator::new();
    backend.reply(r#"{"variants":[{"question":"猫吃鱼吗？","answer":true}]}"#);
    backend.reply(r#"{"variants":[{"question":"我有猫吗？","answer":"yes"}]}"#);

    let generator = ContentGenerator::new(backend.clone(), test_generation_config());
    let concept = target_concept(&CHINESE);
    let known = KnownVocabularySet::from_pairs([("我", 80), ("有", 80), ("吗", 80)]);
    let target = GenerationTarget {
        concept: &concept,
        known: &known,
        distractors: &[],
    };

    let question = runtime()
        .block_on(generator.generate_question(&target, QuestionType::YesNo))
        .expect("second attempt is legal");
    assert_eq!(question.question, "我有猫吗？");
    assert_eq!(question.answer, "yes");

    let prompts = backend.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(!prompts[0].system.contains("does not know"));
    assert!(prompts[1].system.contains("吃"));
    assert!(prompts[1].system.contains("鱼"));
}

#[test]
fn phonetic_recall_never_calls_the_backend() {
    let backend = ScriptedGenerator::new();
    let generator = ContentGenerator::new(backend.clone(), test_generation_config());
    let concept = target_concept(&CHINESE);
    let known = KnownVocabularySet::default();
    let target = GenerationTarget {
        concept: &concept,
        known: &known,
        distractors: &[],
    };

    let question = runtime()
        .block_on(generator.generate_question(&target, QuestionType::PhoneticRecall))
        .expect("local content");
    assert_eq!(question.question, CHINESE.target);
    assert_eq!(question.answer, "māo");
    assert_eq!(backend.calls(), 0);
}

#[test]
fn generator_can_be_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<ContentGenerator>();
    assert_send_sync::<Arc<ScriptedGenerator>>();
}
