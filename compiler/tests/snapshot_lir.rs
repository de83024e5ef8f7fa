// Snapshot tests: lock the textual LIR and stamp listings.
//
// Uses the library API (parse → analyze → stamp → carriers → lower → verify
// → inline) and snapshots the Display output with `insta` inline snapshots.
//
// Run `cargo insta review` after intentional output changes to update baselines.

use axc::pass::PassId;
use axc::pipeline::{run_pipeline, CompilationState, CompileOptions};
use axc::registry::Registry;

const ORDERS: &str = "\
input items.price : [items] float
input items.qty : [items] integer
value subtotal = multiply(input.items.price, input.items.qty)
value total = reduce(sum, subtotal)
";

const NESTED: &str = "\
input orders.lines.qty : [orders, lines] integer
value per_order = sum(input.orders.lines.qty)
value grand = reduce(sum, per_order)
";

fn compiled(source: &str, inline: bool) -> CompilationState {
    let mut state = CompilationState::from_source(source, Registry::with_builtins())
        .unwrap_or_else(|d| panic!("front end failed: {:?}", d));
    run_pipeline(
        &mut state,
        PassId::Inline,
        &CompileOptions { inline },
        false,
        |_, _| {},
    )
    .unwrap_or_else(|e| panic!("{:?} failed: {:?}", e.failing_pass, state.diagnostics));
    state
}

fn lir_text(source: &str, inline: bool) -> String {
    compiled(source, inline)
        .final_lir()
        .map(|lir| lir.to_string())
        .unwrap_or_default()
}

#[test]
fn orders_lowered() {
    insta::assert_snapshot!(lir_text(ORDERS, false).trim_end(), @r"
value subtotal : [items] float
  %0 = load_input items
  loop_start L0 over %0 axis=items el=%1 idx=%2
    %3 = load_field %1.price : float
    %4 = load_field %1.qty : integer
    %5 = kernel_call multiply(%3, %4) : float
    yield %5
  loop_end L0

value total : [] float
  declare_accumulator acc0 sum = 0.0 : float
  %0 = load_input items
  loop_start L0 over %0 axis=items el=%1 idx=%2
    %3 = load_declaration subtotal : [items] float
    accumulate acc0 sum %3
  loop_end L0
  %4 = load_accumulator acc0 : float
  yield %4
");
}

#[test]
fn orders_inlined() {
    let state = compiled(ORDERS, true);
    let total = state.final_lir().unwrap().get("total").unwrap().to_string();
    insta::assert_snapshot!(total.trim_end(), @r"
value total : [] float
  declare_accumulator acc0 sum = 0.0 : float
  %0 = load_input items
  loop_start L0 over %0 axis=items el=%1 idx=%2
    %5 = load_field %1.price : float
    %6 = load_field %1.qty : integer
    %7 = kernel_call multiply(%5, %6) : float
    accumulate acc0 sum %7
  loop_end L0
  %4 = load_accumulator acc0 : float
  yield %4
");
}

#[test]
fn nested_inlined() {
    insta::assert_snapshot!(lir_text(NESTED, true).trim_end(), @r"
value per_order : [orders] integer
  %0 = load_input orders
  loop_start L0 over %0 axis=orders el=%1 idx=%2
    declare_accumulator acc0 sum = 0 : integer
    %3 = load_field %1.lines
    loop_start L1 over %3 axis=lines el=%4 idx=%5
      %6 = load_field %4.qty : integer
      accumulate acc0 sum %6
    loop_end L1
    %7 = load_accumulator acc0 : integer
    yield %7
  loop_end L0

value grand : [] integer
  declare_accumulator acc0 sum = 0 : integer
  %0 = load_input orders
  loop_start L0 over %0 axis=orders el=%1 idx=%2
    declare_accumulator acc1 sum = 0 : integer
    %5 = load_field %1.lines
    loop_start L1 over %5 axis=lines el=%6 idx=%7
      %8 = load_field %6.qty : integer
      accumulate acc1 sum %8
    loop_end L1
    %9 = load_accumulator acc1 : integer
    accumulate acc0 sum %9
  loop_end L0
  %4 = load_accumulator acc0 : integer
  yield %4
");
}

const LINES: &str = "\
input orders.lines.qty : [orders, lines] integer
value doubled = multiply(input.orders.lines.qty, 2)
value per_order = sum(doubled)
";

#[test]
fn two_frame_callee_inlined() {
    let state = compiled(LINES, true);
    let per_order = state.final_lir().unwrap().get("per_order").unwrap().to_string();
    insta::assert_snapshot!(per_order.trim_end(), @r"
value per_order : [orders] integer
  %0 = load_input orders
  loop_start L0 over %0 axis=orders el=%1 idx=%2
    declare_accumulator acc0 sum = 0 : integer
    %3 = load_field %1.lines
    loop_start L1 over %3 axis=lines el=%4 idx=%5
      %9 = load_field %4.qty : integer
      %10 = constant 2 : integer
      %11 = kernel_call multiply(%9, %10) : integer
      accumulate acc0 sum %11
    loop_end L1
    %7 = load_accumulator acc0 : integer
    yield %7
  loop_end L0
");
}

#[test]
fn orders_stamps() {
    let state = compiled(ORDERS, false);
    let stamps = state.artifacts.stamped.as_ref().unwrap().to_string();
    insta::assert_snapshot!(stamps.trim_end(), @r"
value subtotal : [items] float  # topo 0
  v2 call multiply : [items] float
    v0 input items.price : [items] float
    v1 input items.qty : [items] integer

value total : [] float  # topo 1
  v4 reduce sum over [items] : [] float
    v3 ref subtotal : [items] float
");
}
