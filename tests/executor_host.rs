use haversbench::error::{ExecutorError, HaversError};
use haversbench::executor::{Bindings, Executor, ScriptExecutor};
use haversbench::recurrence::reference_value;
use haversbench::Value;
use pretty_assertions::assert_eq;

#[test]
fn executor_compiles_once_and_invokes_many_times() {
    let mut exec = ScriptExecutor::new(101);
    let unit = exec
        .compile(
            r#"
dae fib(x) {
    ken engine = recurrence()
    gie engine.get(x)
}
"#,
        )
        .unwrap();
    assert!(unit.defines("fib"));

    for n in [0i64, 1, 2, 40, 80, 100] {
        let got = exec.invoke("fib", vec![Value::Integer(n)]).unwrap();
        assert_eq!(got, Value::Integer(reference_value(n as u64)));
    }
}

#[test]
fn executor_scoped_eval_reads_back_by_name() {
    let mut exec = ScriptExecutor::new(101);
    let unit = exec
        .compile("dae calc(x) { gie recurrence().get(x) }\nken a = calc(p)\nken doubled = a * 2")
        .unwrap();

    let mut bindings = Bindings::new();
    bindings.put("p", Value::Integer(15));
    exec.eval_scoped(&unit, &mut bindings).unwrap();

    assert_eq!(bindings.get("a"), Some(&Value::Integer(610)));
    assert_eq!(bindings.get("doubled"), Some(&Value::Integer(1220)));
}

#[test]
fn executor_wrong_arity_is_an_invoke_error() {
    let mut exec = ScriptExecutor::new(101);
    exec.compile("dae fib(x) { gie recurrence().get(x) }").unwrap();
    let err = exec.invoke("fib", vec![]).unwrap_err();
    assert!(matches!(
        err,
        ExecutorError::Invoke {
            source: HaversError::WrongArity { expected: 1, got: 0, .. },
            ..
        }
    ));
}

#[test]
fn executor_scripts_can_use_control_flow() {
    let mut exec = ScriptExecutor::new(101);
    let unit = exec
        .compile(
            r#"
ken total = 0
ken i = 0
whiles i < n {
    gin i % 2 == 0 {
        total = total + recurrence().get(i)
    }
    i = i + 1
}
"#,
        )
        .unwrap();

    let mut bindings = Bindings::new();
    bindings.put("n", Value::Integer(10));
    exec.eval_scoped(&unit, &mut bindings).unwrap();
    // 0 + 1 + 3 + 8 + 21
    assert_eq!(bindings.get("total"), Some(&Value::Integer(33)));
}

#[test]
fn executor_blether_is_captured() {
    let mut exec = ScriptExecutor::new(101);
    let unit = exec
        .compile("blether \"fib o' \" + tae_string(p)\nblether recurrence().get(p)")
        .unwrap();
    let mut bindings = Bindings::new();
    bindings.put("p", Value::Integer(7));
    exec.eval_scoped(&unit, &mut bindings).unwrap();
    assert_eq!(exec.output(), &["fib o' 7".to_string(), "13".to_string()]);
}
