// Evaluator progress logging: cycle pinning and delayed-constraint
// re-checks are invisible in results, so the test harness prints
// them. Compiles to nothing outside of tests.
#[macro_export]
macro_rules! eval_trace {
    ( $fmt:expr $(, $arg:expr)* ) => {
        if cfg!(test) {
            println!(concat!("eval: ", $fmt) $(, $arg)*);
        }
    };
}
