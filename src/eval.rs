use std::collections::HashMap;
use std::io::{BufReader, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use log::{debug, trace};
use serde_json::json;

use crate::{
    Error,
    error::BoxError,
    lex::RuneStream,
    parse::{Definition, MethodCall, Parser, Program},
};

/// A host object that can sit at the receiving end of a call chain.
pub trait Dispatch {
    /// Performs `call` and says which object receives the next call.
    fn dispatch(&mut self, call: &MethodCall) -> Result<Next, BoxError>;

    /// JSON for the object's current state, embedded verbatim in the output.
    /// Called once at the end of every chain that ends on this object.
    fn marshal_json(&mut self) -> Result<Vec<u8>, BoxError>;
}

/// The receiver of the next call in a chain.
///
/// A pivot hands the evaluator an owned box, which is dropped once the chain
/// has been marshalled. Objects registered in a [`SymbolTable`] can't be
/// pivoted to directly. A host that needs a chain to continue on a shared
/// object returns a handle to it instead, e.g. a small `Dispatch` shim over
/// `Rc<RefCell<T>>` that forwards both calls.
pub enum Next {
    /// Keep dispatching on the same object.
    This,
    /// Continue the chain on another object, e.g. one produced by a builder.
    Object(Box<dyn Dispatch>),
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Next::This => f.write_str("This"),
            Next::Object(_) => f.write_str("Object(..)"),
        }
    }
}

/// Receiver names to the objects a program may address.
#[derive(Default)]
pub struct SymbolTable {
    objects: HashMap<String, Box<dyn Dispatch>>,
}

impl SymbolTable {
    pub fn new() -> Self {
        SymbolTable::default()
    }

    pub fn insert(
        &mut self,
        name: impl Into<String>,
        object: impl Dispatch + 'static,
    ) -> Option<Box<dyn Dispatch>> {
        self.insert_boxed(name, Box::new(object))
    }

    pub fn insert_boxed(
        &mut self,
        name: impl Into<String>,
        object: Box<dyn Dispatch>,
    ) -> Option<Box<dyn Dispatch>> {
        self.objects.insert(name.into(), object)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut (dyn Dispatch + 'static)> {
        match self.objects.get_mut(name) {
            Some(object) => Some(&mut **object),
            None => None,
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Dispatch>> {
        self.objects.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.objects.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// The receiver of the next call: borrowed from the symbol table until a
/// call pivots to an object the chain owns.
enum Current<'a> {
    Root(&'a mut (dyn Dispatch + 'static)),
    Pivot(Box<dyn Dispatch>),
}

impl<'a> Current<'a> {
    fn object(&mut self) -> &mut (dyn Dispatch + 'static) {
        match self {
            Current::Root(object) => &mut **object,
            Current::Pivot(object) => &mut **object,
        }
    }

    fn apply(mut self, target: &str, call: &MethodCall) -> Result<Current<'a>, Error> {
        trace!("{target}: dispatching {call}");
        let next = self.object().dispatch(call);
        match next {
            Ok(Next::This) => Ok(self),
            Ok(Next::Object(object)) => Ok(Current::Pivot(object)),
            Err(source) => {
                debug!("{target}: `{}` rejected: {source}", call.name);
                Err(Error::Dispatch {
                    target: target.to_owned(),
                    method: call.name.clone(),
                    source,
                })
            }
        }
    }

    fn marshal(mut self, target: &str) -> Result<Vec<u8>, Error> {
        self.object().marshal_json().map_err(|source| {
            debug!("{target}: marshalling failed: {source}");
            Error::Marshal {
                target: target.to_owned(),
                source,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Strategy {
    /// Parse the whole program, then evaluate it. Nothing is written unless
    /// every binding succeeds.
    #[default]
    TwoPhase,
    /// Dispatch each call as soon as it is parsed. Bindings are written as
    /// they complete; on failure the failing binding's value becomes
    /// `{"error": "..."}`, the object is closed and evaluation stops.
    Streaming,
}

pub struct Evaluator<'s> {
    symbols: &'s mut SymbolTable,
    strategy: Strategy,
}

impl<'s> Evaluator<'s> {
    pub fn new(symbols: &'s mut SymbolTable) -> Self {
        Evaluator {
            symbols,
            strategy: Strategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn evaluate_str<W: Write>(&mut self, output: &mut W, program: &str) -> Result<(), Error> {
        self.run(output, Parser::new(program))
    }

    pub fn evaluate<W: Write, R: Read>(&mut self, output: &mut W, program: R) -> Result<(), Error> {
        self.run(output, Parser::from_reader(BufReader::new(program)))
    }

    pub fn run<S: RuneStream, W: Write>(
        &mut self,
        output: &mut W,
        mut parser: Parser<S>,
    ) -> Result<(), Error> {
        match self.strategy {
            Strategy::TwoPhase => {
                let program = parser.parse_program()?;
                let response = self.evaluate_program(&program)?;
                output.write_all(&response)?;
                Ok(())
            }
            Strategy::Streaming => self.stream(output, &mut parser),
        }
    }

    pub fn evaluate_program(&mut self, program: &Program) -> Result<Bytes, Error> {
        debug!("evaluating {} definition(s)", program.len());
        let mut response = BytesMut::new();
        response.put_u8(b'{');
        for (i, definition) in program.iter().enumerate() {
            let json = self.evaluate_definition(definition)?;
            if i > 0 {
                response.put_slice(b",\n");
            }
            put_key(&mut response, &definition.target);
            response.put_slice(&json);
        }
        response.put_u8(b'}');
        Ok(response.freeze())
    }

    /// Folds the chain over the receiver and marshals whatever it ends on.
    pub fn evaluate_definition(&mut self, definition: &Definition) -> Result<Vec<u8>, Error> {
        let target = &definition.target;
        let mut current = self.resolve(target, &definition.receiver)?;
        for call in &definition.calls {
            current = current.apply(target, call)?;
        }
        current.marshal(target)
    }

    fn resolve(&mut self, target: &str, receiver: &str) -> Result<Current<'_>, Error> {
        self.symbols
            .get_mut(receiver)
            .map(Current::Root)
            .ok_or_else(|| Error::ReceiverNotFound {
                target: target.to_owned(),
                receiver: receiver.to_owned(),
            })
    }

    fn stream<S: RuneStream, W: Write>(
        &mut self,
        output: &mut W,
        parser: &mut Parser<S>,
    ) -> Result<(), Error> {
        debug!("streaming evaluation");
        output.write_all(b"{")?;
        let outcome = self.stream_bindings(output, parser);
        output.write_all(b"}")?;
        outcome
    }

    fn stream_bindings<S: RuneStream, W: Write>(
        &mut self,
        output: &mut W,
        parser: &mut Parser<S>,
    ) -> Result<(), Error> {
        let mut first = true;
        while let Some(target) = parser.parse_target()? {
            if !first {
                output.write_all(b",\n")?;
            }
            first = false;
            write!(output, "\"{target}\":")?;

            match self.stream_chain(&target, parser) {
                Ok(json) => output.write_all(&json)?,
                Err(e) => {
                    let fragment = json!({ "error": e.to_string() });
                    output.write_all(fragment.to_string().as_bytes())?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    fn stream_chain<S: RuneStream>(
        &mut self,
        target: &str,
        parser: &mut Parser<S>,
    ) -> Result<Vec<u8>, Error> {
        let receiver = parser.parse_receiver()?;
        let mut current = self.resolve(target, &receiver)?;
        let mut first = true;
        while let Some(call) = parser.parse_call(first)? {
            current = current.apply(target, &call)?;
            first = false;
        }
        current.marshal(target)
    }
}

fn put_key(response: &mut BytesMut, target: &str) {
    response.put_u8(b'"');
    response.put_slice(target.as_bytes());
    response.put_slice(b"\":");
}

/// Two-phase evaluation of a program read from `program`.
pub fn evaluate<W: Write, R: Read>(
    output: &mut W,
    program: R,
    symbols: &mut SymbolTable,
) -> Result<(), Error> {
    Evaluator::new(symbols).evaluate(output, program)
}

/// Two-phase evaluation of an in-memory program.
pub fn evaluate_str<W: Write>(
    output: &mut W,
    program: &str,
    symbols: &mut SymbolTable,
) -> Result<(), Error> {
    Evaluator::new(symbols).evaluate_str(output, program)
}

/// Streaming evaluation: see [`Strategy::Streaming`] for the failure output.
pub fn dispatch<W: Write, R: Read>(
    output: &mut W,
    program: R,
    symbols: &mut SymbolTable,
) -> Result<(), Error> {
    Evaluator::new(symbols)
        .with_strategy(Strategy::Streaming)
        .evaluate(output, program)
}
