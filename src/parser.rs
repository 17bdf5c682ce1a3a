use crate::{
    error::{tilt, PsResult},
    lexer::Lexer,
    object::{Object, Value},
    vm::Vm,
};

/// Assembles the lexer's token stream into top-level objects: everything
/// between `{` and `}` is collected into an executable array, nesting as
/// needed. Non-brace tokens pass through unchanged
#[derive(Debug)]
pub(crate) struct Parser {
    lexer: Lexer,
    open: Vec<Vec<Object>>,
}

impl Parser {
    pub fn new(text: Vec<u8>) -> Self {
        Self {
            lexer: Lexer::new(text),
            open: Vec::new(),
        }
    }

    /// Bytes of source consumed so far, including a whole assembled block
    pub fn consumed(&self) -> usize {
        self.lexer.cursor()
    }

    pub fn next_object(&mut self, vm: &mut Vm) -> PsResult<Option<Object>> {
        loop {
            let Some(tok) = self.lexer.next_token(vm)? else {
                if !self.open.is_empty() {
                    tilt!(SyntaxError, "unbalanced {{");
                }
                return Ok(None);
            };

            let obj = match &tok.value {
                Value::Name(n) if !tok.literal && n.as_bytes() == b"{" => {
                    self.open.push(Vec::new());
                    continue;
                }
                Value::Name(n) if !tok.literal && n.as_bytes() == b"}" => {
                    let Some(body) = self.open.pop() else {
                        tilt!(SyntaxError, "unbalanced }}");
                    };
                    Object::executable(Value::Array(vm.new_array(body)))
                }
                _ => tok,
            };

            match self.open.last_mut() {
                Some(body) => body.push(obj),
                None => return Ok(Some(obj)),
            }
        }
    }
}
