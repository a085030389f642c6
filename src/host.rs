use std::collections::HashMap;

use log::debug;
use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

use crate::{
    error::{ArityError, BoxError},
    eval::{Dispatch, Next},
    parse::MethodCall,
};

/// A method bound to host state `T`.
pub type Method<T> = fn(&mut T, &MethodCall) -> Result<Next, BoxError>;

#[derive(Error, Debug, Diagnostic)]
#[error("`{type_name}` has no method `{method}`")]
#[diagnostic(code(callchain::unknown_method))]
pub struct UnknownMethodError {
    pub type_name: &'static str,
    pub method: String,
}

/// Makes any serializable value dispatchable through a table of methods.
/// Marshalling serializes the value with `serde_json`.
pub struct Object<T> {
    type_name: &'static str,
    state: T,
    methods: HashMap<&'static str, Method<T>>,
}

impl<T> Object<T> {
    pub fn new(type_name: &'static str, state: T) -> Self {
        Object {
            type_name,
            state,
            methods: HashMap::new(),
        }
    }

    pub fn method(mut self, name: &'static str, method: Method<T>) -> Self {
        self.methods.insert(name, method);
        self
    }

    pub fn state(&self) -> &T {
        &self.state
    }

    pub fn into_state(self) -> T {
        self.state
    }
}

impl<T: Serialize> Dispatch for Object<T> {
    fn dispatch(&mut self, call: &MethodCall) -> Result<Next, BoxError> {
        let Some(&method) = self.methods.get(call.name.as_str()) else {
            debug!("{}: no method `{}`", self.type_name, call.name);
            return Err(UnknownMethodError {
                type_name: self.type_name,
                method: call.name.clone(),
            }
            .into());
        };
        method(&mut self.state, call)
    }

    fn marshal_json(&mut self) -> Result<Vec<u8>, BoxError> {
        Ok(serde_json::to_vec(&self.state)?)
    }
}

pub fn expect_arity(call: &MethodCall, expected: usize) -> Result<(), ArityError> {
    if call.arguments.len() == expected {
        Ok(())
    } else {
        Err(ArityError {
            method: call.name.clone(),
            expected,
            found: call.arguments.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{lex::TokenKind, parse::ArgumentLiteral};

    #[derive(Debug, Default, Serialize)]
    struct Counter {
        value: i64,
    }

    fn add(counter: &mut Counter, call: &MethodCall) -> Result<Next, BoxError> {
        expect_arity(call, 1)?;
        counter.value += call.argument(0)?.to_int()?;
        Ok(Next::This)
    }

    fn counter() -> Object<Counter> {
        Object::new("Counter", Counter::default()).method("add", add)
    }

    fn call(name: &str, arguments: &[(TokenKind, &str)]) -> MethodCall {
        MethodCall::new(
            name,
            arguments
                .iter()
                .map(|&(kind, literal)| ArgumentLiteral::new(kind, literal))
                .collect(),
        )
    }

    #[test]
    fn dispatches_through_the_method_table() {
        let mut object = counter();
        object.dispatch(&call("add", &[(TokenKind::Int, "2")])).unwrap();
        object.dispatch(&call("add", &[(TokenKind::Int, "-5")])).unwrap();
        assert_eq!(object.state().value, -3);
        assert_eq!(object.marshal_json().unwrap(), br#"{"value":-3}"#);
        assert_eq!(object.into_state().value, -3);
    }

    #[test]
    fn rejects_unknown_methods() {
        let err = counter().dispatch(&call("sub", &[])).unwrap_err();
        let err = err.downcast::<UnknownMethodError>().unwrap();
        assert_eq!(err.method, "sub");
        assert_eq!(err.to_string(), "`Counter` has no method `sub`");
    }

    #[test]
    fn argument_problems_surface_from_the_method() {
        let err = counter().dispatch(&call("add", &[])).unwrap_err();
        assert!(err.downcast_ref::<ArityError>().is_some(), "{err}");

        let err = counter()
            .dispatch(&call("add", &[(TokenKind::String, r#""2""#)]))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            r#"to_int(): cannot convert STRING literal `"2"`"#
        );
    }
}
