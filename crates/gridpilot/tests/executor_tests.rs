//! Step-level behavior: error policies, search descriptors, conditionals,
//! loops, and waits, driven directly through the executor.

mod common;

use std::sync::Arc;

use gridpilot::{
    CompareOp, Condition, ConditionalParams, ControlHandle, ErrorPolicy, ExecutionContext,
    LoopMode, LoopParams, MacroStep, NullObserver, SearchAction, SearchActionKind, StepExecutor,
    StepFailure, StepFlow, StepKind, TextSearchParams, WaitImageParams,
};

use common::{bindings, click_step, test_config, type_step, RecordingInput, ScriptedVision};

struct Rig {
    vision: Arc<ScriptedVision>,
    input: Arc<RecordingInput>,
    executor: StepExecutor,
}

fn rig() -> Rig {
    common::init_tracing();
    let vision = Arc::new(ScriptedVision::new());
    let input = Arc::new(RecordingInput::new());
    let executor = StepExecutor::new(
        vision.clone(),
        input.clone(),
        Arc::new(NullObserver),
        test_config(),
    );
    Rig {
        vision,
        input,
        executor,
    }
}

fn standalone_ctx() -> ExecutionContext {
    ExecutionContext::standalone(ControlHandle::new())
}

fn text_search_step(target: &str, exact: bool) -> TextSearchParams {
    TextSearchParams {
        search_text: target.to_string(),
        excel_column: None,
        region: None,
        exact_match: exact,
        confidence: 0.5,
        click_offset: (0, 0),
        timeout_ms: None,
        on_found: None,
        on_not_found: None,
    }
}

#[tokio::test]
async fn retry_policy_invokes_the_handler_exactly_n_plus_one_times() {
    let rig = rig();
    rig.input.fail_clicks();

    let mut step = click_step(5, 5);
    step.error_policy = ErrorPolicy::Retry;
    step.retry_count = 3;

    let mut ctx = standalone_ctx();
    let error = rig.executor.run_step(&step, &mut ctx).await.unwrap_err();

    assert_eq!(
        rig.input
            .click_attempts
            .load(std::sync::atomic::Ordering::SeqCst),
        4
    );
    assert!(matches!(error.cause, StepFailure::Input(_)));
}

#[tokio::test]
async fn continue_policy_does_not_block_later_steps() {
    let rig = rig();
    rig.input.fail_clicks();

    let mut failing = click_step(5, 5);
    failing.error_policy = ErrorPolicy::Continue;
    let after = type_step("still here");

    let mut ctx = standalone_ctx();
    assert_eq!(
        rig.executor.run_step(&failing, &mut ctx).await.unwrap(),
        StepFlow::Continue
    );
    assert!(!ctx.warnings.is_empty());
    assert_eq!(
        rig.executor.run_step(&after, &mut ctx).await.unwrap(),
        StepFlow::Continue
    );
    assert_eq!(rig.input.typed_texts(), vec!["still here".to_string()]);
}

#[tokio::test]
async fn scenario_c_exact_match_rejects_partial_text() {
    let rig = rig();
    rig.vision.show_text("ABC");

    // Exact: "AB" is not "ABC" — the miss escalates under stop policy.
    let exact = MacroStep::new(StepKind::TextSearch(text_search_step("AB", true)));
    let mut ctx = standalone_ctx();
    let error = rig.executor.run_step(&exact, &mut ctx).await.unwrap_err();
    assert!(matches!(error.cause, StepFailure::NotFound(_)));

    // Substring: "AB" occurs within "ABC".
    let loose = MacroStep::new(StepKind::TextSearch(text_search_step("AB", false)));
    assert_eq!(
        rig.executor.run_step(&loose, &mut ctx).await.unwrap(),
        StepFlow::Continue
    );
}

#[tokio::test]
async fn found_action_clicks_with_offset() {
    let rig = rig();
    rig.vision.show_text("Submit");

    let mut params = text_search_step("submit", false);
    params.click_offset = (4, -2);
    params.on_found = Some(SearchAction::of(SearchActionKind::Click));
    let step = MacroStep::new(StepKind::TextSearch(params));

    let mut ctx = standalone_ctx();
    rig.executor.run_step(&step, &mut ctx).await.unwrap();

    // The scripted hit centers at (80, 50); the step offset shifts it.
    assert_eq!(rig.input.clicks.lock().unwrap().as_slice(), &[(84, 48, 1)]);
}

#[tokio::test]
async fn found_action_types_the_matched_text() {
    let rig = rig();
    rig.vision.show_text("Invoice 42");

    let mut params = text_search_step("invoice", false);
    params.on_found = Some(SearchAction::of(SearchActionKind::Type));
    let step = MacroStep::new(StepKind::TextSearch(params));

    let mut ctx = standalone_ctx();
    rig.executor.run_step(&step, &mut ctx).await.unwrap();

    assert_eq!(rig.input.typed_texts(), vec!["Invoice 42".to_string()]);
}

#[tokio::test]
async fn not_found_retry_probes_a_second_time() {
    let rig = rig();

    let mut params = text_search_step("never there", false);
    params.on_not_found = Some(SearchAction::of(SearchActionKind::Retry));
    let step = MacroStep::new(StepKind::TextSearch(params));

    let mut ctx = standalone_ctx();
    let error = rig.executor.run_step(&step, &mut ctx).await.unwrap_err();

    assert!(matches!(error.cause, StepFailure::NotFound(_)));
    assert_eq!(
        rig.vision
            .text_probes
            .load(std::sync::atomic::Ordering::SeqCst),
        2
    );
}

#[tokio::test]
async fn excel_column_binding_overrides_the_literal_target() {
    let rig = rig();
    rig.vision.show_text("고객명：김철수");

    let mut params = text_search_step("ignored", false);
    params.excel_column = Some("customer".to_string());
    let step = MacroStep::new(StepKind::TextSearch(params));

    // Full-width punctuation in the screen text normalizes before matching.
    let mut ctx = ExecutionContext::for_row(
        0,
        bindings(&[("customer", "김철수")]),
        ControlHandle::new(),
    );
    assert_eq!(
        rig.executor.run_step(&step, &mut ctx).await.unwrap(),
        StepFlow::Continue
    );
}

#[tokio::test]
async fn conditional_picks_the_branch_from_the_row_value() {
    let rig = rig();

    let step = MacroStep::new(StepKind::Conditional(ConditionalParams {
        condition: Condition::ExcelValueCompare {
            column: "amount".to_string(),
            op: CompareOp::GreaterThan,
            value: "100".to_string(),
        },
        then_steps: vec![click_step(1, 1)],
        else_steps: vec![type_step("too small")],
    }));

    let mut ctx = ExecutionContext::for_row(0, bindings(&[("amount", "250")]), ControlHandle::new());
    rig.executor.run_step(&step, &mut ctx).await.unwrap();
    assert_eq!(rig.input.click_count(), 1);
    assert!(rig.input.typed_texts().is_empty());

    let mut ctx = ExecutionContext::for_row(1, bindings(&[("amount", "50")]), ControlHandle::new());
    rig.executor.run_step(&step, &mut ctx).await.unwrap();
    assert_eq!(rig.input.click_count(), 1);
    assert_eq!(rig.input.typed_texts(), vec!["too small".to_string()]);
}

#[tokio::test]
async fn conditional_on_screen_text_falls_to_the_else_branch() {
    let rig = rig();

    let step = MacroStep::new(StepKind::Conditional(ConditionalParams {
        condition: Condition::TextExists {
            target: "error dialog".to_string(),
            region: None,
            exact_match: false,
            confidence: 0.5,
        },
        then_steps: vec![click_step(9, 9)],
        else_steps: vec![click_step(1, 1)],
    }));

    let mut ctx = standalone_ctx();
    rig.executor.run_step(&step, &mut ctx).await.unwrap();
    assert_eq!(rig.input.clicks.lock().unwrap().as_slice(), &[(1, 1, 1)]);
}

#[tokio::test]
async fn counted_loop_runs_its_body_each_iteration() {
    let rig = rig();

    let step = MacroStep::new(StepKind::Loop(LoopParams {
        mode: LoopMode::Count { count: 3 },
        body: vec![click_step(2, 2)],
    }));

    let mut ctx = standalone_ctx();
    rig.executor.run_step(&step, &mut ctx).await.unwrap();

    assert_eq!(rig.input.click_count(), 3);
    // The loop is one step unit regardless of iterations.
    assert_eq!(ctx.step_progress, 1.0);
}

#[tokio::test]
async fn while_loop_with_a_false_condition_never_runs() {
    let rig = rig();

    let step = MacroStep::new(StepKind::Loop(LoopParams {
        mode: LoopMode::While {
            condition: Condition::TextExists {
                target: "busy".to_string(),
                region: None,
                exact_match: false,
                confidence: 0.5,
            },
        },
        body: vec![click_step(2, 2)],
    }));

    let mut ctx = standalone_ctx();
    rig.executor.run_step(&step, &mut ctx).await.unwrap();
    assert_eq!(rig.input.click_count(), 0);
}

#[tokio::test]
async fn wait_for_image_times_out_as_a_step_failure() {
    let rig = rig();

    let step = MacroStep::new(StepKind::WaitForImage(WaitImageParams {
        template: "never.png".to_string(),
        region: None,
        confidence: 0.9,
        timeout_ms: 20,
    }));

    let mut ctx = standalone_ctx();
    let error = rig.executor.run_step(&step, &mut ctx).await.unwrap_err();
    assert!(matches!(error.cause, StepFailure::Timeout(20)));

    // Present template resolves immediately.
    rig.vision.show_image("never.png");
    assert_eq!(
        rig.executor.run_step(&step, &mut ctx).await.unwrap(),
        StepFlow::Continue
    );
}

#[tokio::test]
async fn unresolved_variables_are_typed_verbatim_and_warned() {
    let rig = rig();

    let step = type_step("id: ${missing}");
    let mut ctx = ExecutionContext::for_row(0, bindings(&[("name", "x")]), ControlHandle::new());
    rig.executor.run_step(&step, &mut ctx).await.unwrap();

    assert_eq!(rig.input.typed_texts(), vec!["id: ${missing}".to_string()]);
    assert_eq!(ctx.warnings.len(), 1);
    assert!(ctx.warnings[0].contains("missing"));
}
