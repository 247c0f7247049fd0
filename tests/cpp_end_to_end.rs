//! Real g++ submissions. Each test returns early when g++ is not installed.

mod common;

use codejudge::config::loader::CompilersConfig;
use codejudge::core::cancel::CancelToken;
use codejudge::{Judge, JudgeResult, Language, MemoryStore, ResultCode, Submission};
use common::{case, gpp_available, scratch_entries, test_config};

const SUM: &str = r#"
#include <iostream>
int main() {
    long long a, b;
    std::cin >> a >> b;
    std::cout << a + b << std::endl;
    return 0;
}
"#;

fn gpp_judge(label: &str, wall_clock_ms: u64, memory_mb: u64) -> Option<Judge> {
    if !gpp_available() {
        eprintln!("g++ not found, skipping");
        return None;
    }
    let mut config = test_config(label);
    config.compilers = CompilersConfig::default();
    config.limits.wall_clock_ms = wall_clock_ms;
    config.limits.memory_mb = memory_mb;
    Some(Judge::new(config).unwrap())
}

fn judge_source(judge: &Judge, source: &str, store: &MemoryStore) -> JudgeResult {
    judge
        .judge(&Submission::new(Language::Cpp, source, 1), store, &CancelToken::new())
        .unwrap()
}

#[test]
fn test_sum_program_is_accepted() {
    let Some(judge) = gpp_judge("cpp-sum", 5_000, 256) else {
        return;
    };
    let store = MemoryStore::from_cases([
        case(1, 1, "2 2", "4", 10),
        case(2, 1, "-5 5", "0", 10),
    ])
    .unwrap();

    let result = judge_source(&judge, SUM, &store);
    assert_eq!(result, JudgeResult::new(ResultCode::Success, "", 20));
    assert_eq!(scratch_entries(&judge.config().scratch_root), 0);
}

#[test]
fn test_constant_output_fails_first_case() {
    let Some(judge) = gpp_judge("cpp-zero", 5_000, 256) else {
        return;
    };
    let store = MemoryStore::from_cases([
        case(1, 1, "2 2", "4", 5),
        case(2, 1, "3 3", "6", 5),
    ])
    .unwrap();
    let source = "#include <cstdio>\nint main() { std::puts(\"0\"); return 0; }\n";

    let result = judge_source(&judge, source, &store);
    assert_eq!(
        result,
        JudgeResult::new(ResultCode::IncorrectAnswer, "Test Failed: 1", 0)
    );
    assert_eq!(scratch_entries(&judge.config().scratch_root), 0);
}

#[test]
fn test_syntax_error_is_compile_error() {
    let Some(judge) = gpp_judge("cpp-ce", 5_000, 256) else {
        return;
    };
    let store = MemoryStore::from_cases([case(1, 1, "", "", 10)]).unwrap();

    let result = judge_source(&judge, "int main() { return }", &store);
    assert_eq!(result.result_code, ResultCode::CompileError);
    assert_eq!(result.points, 0);
    assert!(result.description.contains("error"));
    assert_eq!(scratch_entries(&judge.config().scratch_root), 0);
}

#[test]
fn test_infinite_loop_is_time_limit() {
    let Some(judge) = gpp_judge("cpp-tl", 1_000, 256) else {
        return;
    };
    let store = MemoryStore::from_cases([case(1, 1, "", "", 10)]).unwrap();
    let source = "int main() { volatile unsigned long x = 0; for (;;) { ++x; } }";

    let result = judge_source(&judge, source, &store);
    assert_eq!(result, JudgeResult::new(ResultCode::TimeLimit, "", 0));
}

#[test]
fn test_growing_allocation_is_memory_limit() {
    let Some(judge) = gpp_judge("cpp-ml", 5_000, 64) else {
        return;
    };
    let store = MemoryStore::from_cases([case(1, 1, "", "", 10)]).unwrap();
    // Grows resident memory one touched MiB at a time.
    let source = r#"
#include <cstring>
#include <iostream>
#include <vector>
int main() {
    std::vector<char*> blocks;
    for (int i = 0; i < 1024; ++i) {
        char* block = new char[1 << 20];
        std::memset(block, i & 0xff, 1 << 20);
        blocks.push_back(block);
    }
    std::cout << blocks.size() << std::endl;
}
"#;

    let result = judge_source(&judge, source, &store);
    assert_eq!(result, JudgeResult::new(ResultCode::MemoryLimit, "", 0));
}

#[test]
fn test_null_dereference_is_runtime_error() {
    let Some(judge) = gpp_judge("cpp-re", 5_000, 256) else {
        return;
    };
    let store = MemoryStore::from_cases([case(1, 1, "", "", 10)]).unwrap();
    let source = "int main() { volatile int *p = nullptr; *p = 1; return 0; }";

    let result = judge_source(&judge, source, &store);
    assert_eq!(result.result_code, ResultCode::RuntimeError);
    assert!(result.description.starts_with("Error Info: signal: SIGSEGV"));
}
