use callchain::{
    BoxError, Error, Evaluator, MethodCall, Next, Scanner, Strategy, SymbolTable, TokenKind,
    host::{Object, UnknownMethodError, expect_arity},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Debug, Default, Serialize)]
struct Account {
    owner: String,
    balance: i64,
    rate: f64,
    frozen: bool,
    limits: Option<Limits>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Limits {
    daily: i64,
    currencies: Vec<String>,
}

fn owner(account: &mut Account, call: &MethodCall) -> Result<Next, BoxError> {
    expect_arity(call, 1)?;
    account.owner = call.argument(0)?.to_text()?;
    Ok(Next::This)
}

fn deposit(account: &mut Account, call: &MethodCall) -> Result<Next, BoxError> {
    expect_arity(call, 1)?;
    if account.frozen {
        return Err("account is frozen".into());
    }
    account.balance += call.argument(0)?.to_int()?;
    Ok(Next::This)
}

fn rate(account: &mut Account, call: &MethodCall) -> Result<Next, BoxError> {
    expect_arity(call, 1)?;
    account.rate = call.argument(0)?.to_float()?;
    Ok(Next::This)
}

fn freeze(account: &mut Account, call: &MethodCall) -> Result<Next, BoxError> {
    expect_arity(call, 1)?;
    account.frozen = call.argument(0)?.to_bool()?;
    Ok(Next::This)
}

fn limits(account: &mut Account, call: &MethodCall) -> Result<Next, BoxError> {
    expect_arity(call, 1)?;
    account.limits = Some(call.argument(0)?.to_json()?);
    Ok(Next::This)
}

fn account() -> Object<Account> {
    Object::new("Account", Account::default())
        .method("owner", owner)
        .method("deposit", deposit)
        .method("rate", rate)
        .method("freeze", freeze)
        .method("limits", limits)
}

fn open(_: &mut (), call: &MethodCall) -> Result<Next, BoxError> {
    expect_arity(call, 0)?;
    Ok(Next::Object(Box::new(account())))
}

fn symbols() -> SymbolTable {
    let mut symbols = SymbolTable::new();
    symbols.insert("bank", Object::new("Bank", ()).method("open", open));
    symbols.insert("savings", account());
    symbols
}

fn evaluate(strategy: Strategy, program: &str) -> (Result<(), Error>, Vec<u8>) {
    init_logger();
    let mut symbols = symbols();
    let mut output = Vec::new();
    let result = Evaluator::new(&mut symbols)
        .with_strategy(strategy)
        .evaluate_str(&mut output, program);
    (result, output)
}

#[test]
fn builds_objects_through_fluent_chains() {
    let program = r#"
        alice := bank.open().owner("Alice Å").deposit(100).deposit(-30).rate(0.025);
        bob := bank.open()
            .owner("Bob")
            .limits({"daily": 500, "currencies": ["EUR", "SEK"]})
            .freeze(true);
    "#;

    for strategy in [Strategy::TwoPhase, Strategy::Streaming] {
        let (result, output) = evaluate(strategy, program);
        result.unwrap();
        let value: Value = serde_json::from_slice(&output).unwrap();
        assert_eq!(
            value,
            json!({
                "alice": {
                    "owner": "Alice \u{c5}",
                    "balance": 70,
                    "rate": 0.025,
                    "frozen": false,
                    "limits": null,
                },
                "bob": {
                    "owner": "Bob",
                    "balance": 0,
                    "rate": 0.0,
                    "frozen": true,
                    "limits": {"daily": 500, "currencies": ["EUR", "SEK"]},
                },
            }),
            "{strategy:?}"
        );
    }
}

#[test]
fn bindings_keep_source_order() {
    let (result, output) = evaluate(
        Strategy::TwoPhase,
        "z := savings.deposit(1); a := savings.deposit(2); m := savings.deposit(3);",
    );
    result.unwrap();
    let output = String::from_utf8(output).unwrap();
    let z = output.find("\"z\"").unwrap();
    let a = output.find("\"a\"").unwrap();
    let m = output.find("\"m\"").unwrap();
    assert!(z < a && a < m, "{output}");

    // the same receiver accumulates state across bindings
    let value: Value = serde_json::from_str(&output).unwrap();
    assert_eq!(value["z"]["balance"], 1);
    assert_eq!(value["a"]["balance"], 3);
    assert_eq!(value["m"]["balance"], 6);
}

#[test]
fn type_mismatches_surface_as_dispatch_errors() {
    let (result, output) = evaluate(Strategy::TwoPhase, "x := savings.deposit(1.5);");
    match result {
        Err(Error::Dispatch {
            target,
            method,
            source,
        }) => {
            assert_eq!(target, "x");
            assert_eq!(method, "deposit");
            assert_eq!(
                source.to_string(),
                "to_int(): cannot convert FLOAT literal `1.5`"
            );
        }
        other => panic!("expected a dispatch error, got {other:?}"),
    }
    assert!(output.is_empty());
}

#[test]
fn unknown_methods_and_domain_failures() {
    let (result, _) = evaluate(Strategy::TwoPhase, "x := savings.withdraw(1);");
    let Err(Error::Dispatch { source, .. }) = result else {
        panic!("expected a dispatch error, got {result:?}");
    };
    assert!(source.downcast_ref::<UnknownMethodError>().is_some());

    let (result, output) = evaluate(
        Strategy::Streaming,
        "a := savings.deposit(5); b := savings.freeze(true).deposit(1); c := savings.deposit(1);",
    );
    assert!(matches!(result, Err(Error::Dispatch { .. })));
    let value: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["a"]["balance"], 5);
    assert_eq!(
        value["b"],
        json!({"error": "`b`: dispatching `deposit` failed: account is frozen"})
    );
    assert!(value.get("c").is_none());
}

#[test]
fn syntax_errors_render_against_the_source() {
    let program = "x := savings.deposit(1 2);";
    let (result, _) = evaluate(Strategy::TwoPhase, program);
    let err = result.unwrap_err();
    assert_eq!(
        err.to_string(),
        "expected `,` or `)`, got INT (`2`) at rune 23"
    );

    let report = err.with_source_code("request", program);
    assert!(report.source_code().is_some());
    let labels: Vec<_> = report.labels().unwrap().collect();
    assert_eq!(labels.len(), 1);
    assert_eq!(labels[0].offset(), 23);
    assert_eq!(labels[0].len(), 1);
    assert_eq!(
        report.code().map(|code| code.to_string()).as_deref(),
        Some("callchain::syntax")
    );
}

#[test]
fn streams_from_a_reader() {
    let mut symbols = symbols();
    let mut output = Vec::new();
    callchain::dispatch(
        &mut output,
        std::io::Cursor::new(b"acct := bank.open().owner(\"Eve\");".to_vec()),
        &mut symbols,
    )
    .unwrap();
    let value: Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(value["acct"]["owner"], "Eve");
}

#[test]
fn scanners_are_driven_token_by_token() {
    let program = "acct := bank.open();";
    let mut scanner = Scanner::new(program);
    assert_eq!(scanner.scan(true), TokenKind::Ident);
    assert_eq!(scanner.literal(), "acct");
    assert_eq!(scanner.scan(false), TokenKind::Whitespace);
    assert_eq!(scanner.scan(true), TokenKind::Define);

    let rest: Vec<_> = scanner
        .tokens()
        .map(|token| token.unwrap().kind)
        .collect();
    assert_eq!(
        rest,
        [
            TokenKind::Ident,
            TokenKind::Dot,
            TokenKind::Ident,
            TokenKind::OpenParen,
            TokenKind::CloseParen,
            TokenKind::Semi,
        ]
    );
    assert_eq!(scanner.scan(true), TokenKind::Eof);

    let mut scanner = Scanner::from_reader(program.as_bytes());
    assert_eq!(scanner.scan(true), TokenKind::Ident);
    assert_eq!(scanner.rune_offset(), 0);
    assert_eq!(scanner.scan(true), TokenKind::Define);
    assert_eq!(scanner.rune_offset(), 5);
}
