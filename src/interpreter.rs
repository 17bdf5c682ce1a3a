use std::{
    io::{self, Write},
    ops::{Add, Mul, Sub},
    time::Instant,
};

use crate::{
    builtin,
    control::ExecFrame,
    error::{tilt, ErrorKind, FatalTilt, PsResult, Tilted},
    graphics::GraphicsContext,
    object::{latin1_bytes, ArrRef, Object, PsString, StrRef, Value},
    operator::Operator,
    parser::Parser,
    vm::{DictIndex, Vm},
};

/// Ceilings that turn runaway programs into catchable errors instead of
/// exhausted host memory
const ESTACK_LIMIT: usize = 5000;
const OSTACK_LIMIT: usize = 50_000;
const NAME_CHAIN_LIMIT: usize = 1000;

const DIGITS: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// The execution engine: the four stacks, the dispatch loop, and the
/// errordict funnel. One instance fully encapsulates `systemdict`,
/// `userdict`, `errordict`, and `$error`; nothing is process-wide
pub struct Interpreter {
    pub(crate) vm: Vm,
    pub(crate) ostack: Vec<Object>,
    pub(crate) dstack: Vec<DictIndex>,
    pub(crate) estack: Vec<ExecFrame>,

    /// Operands removed during the current operator invocation, pushed
    /// back in order when the operator raises
    popped: Vec<Object>,

    pub(crate) systemdict: DictIndex,
    pub(crate) userdict: DictIndex,
    pub(crate) errordict: DictIndex,
    pub(crate) dollar_error: DictIndex,

    pub(crate) graphics: GraphicsContext,
    rand_state: u32,
    started: Instant,
    out: Box<dyn Write>,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_output(Box::new(io::stdout()))
    }

    pub fn with_output(out: Box<dyn Write>) -> Self {
        let mut vm = Vm::new();
        let systemdict = vm.new_dict(crate::operator::REGISTRY.len() + 16);
        let userdict = vm.new_dict(500);
        let errordict = vm.new_dict(ErrorKind::ALL.len() + 8);
        let dollar_error = vm.new_dict(16);

        let mut interp = Self {
            vm,
            ostack: Vec::new(),
            dstack: vec![systemdict, userdict],
            estack: Vec::new(),
            popped: Vec::new(),
            systemdict,
            userdict,
            errordict,
            dollar_error,
            graphics: GraphicsContext::new(),
            rand_state: 1,
            started: Instant::now(),
            out,
        };

        builtin::install(&mut interp);

        interp
    }

    /// Expose the remaining command-line arguments to PostScript code as a
    /// literal array of strings named `argv`
    pub fn set_argv(&mut self, args: &[String]) {
        let strings = args
            .iter()
            .map(|a| Object::literal(Value::String(self.vm.new_string(latin1_bytes(a)))))
            .collect();
        let arr = self.vm.new_array(strings);
        self.vm
            .dict_payload_mut(self.systemdict)
            .map
            .insert(PsString::from_str("argv"), Object::literal(Value::Array(arr)));
    }

    /// Template for graphics page output; `%d` becomes the page number
    pub fn set_outfile(&mut self, template: String) {
        self.graphics.outfile = Some(template);
    }

    pub fn ostack_depth(&self) -> usize {
        self.ostack.len()
    }

    /// Drop any leftover execution frames, e.g. after a host-level error in
    /// the REPL
    pub fn clear_execution(&mut self) {
        self.estack.clear();
    }

    /// Queue program text for execution
    pub fn add_text(&mut self, text: &[u8]) {
        self.estack.push(ExecFrame::Source(Parser::new(text.to_vec())));
    }

    /// The main loop: run until the execution stack is empty. Recoverable
    /// errors are funneled through `errordict` along the way; the `Err`
    /// case is a `FatalTilt` for the host
    pub fn run(&mut self) -> PsResult<()> {
        while !self.estack.is_empty() {
            self.step()?;
        }
        Ok(())
    }

    /// One turn of the main loop: advance the top execution frame
    fn step(&mut self) -> PsResult<()> {
        let top = self.estack.last_mut().unwrap();
        match top {
            ExecFrame::Objects { arr, cursor } => {
                let a = *arr;
                let i = *cursor;
                if i >= a.len {
                    self.estack.pop();
                    return Ok(());
                }
                *cursor += 1;
                let obj = self.vm.array_slice(a)[i].clone();
                self.exec_top(obj)
            }
            ExecFrame::Source(_) => {
                // Take the parser out so it can borrow the VM freely.
                let Some(ExecFrame::Source(mut parser)) = self.estack.pop() else {
                    unreachable!();
                };
                match parser.next_object(&mut self.vm) {
                    Ok(Some(obj)) => {
                        self.estack.push(ExecFrame::Source(parser));
                        self.exec_top(obj)
                    }
                    Ok(None) => Ok(()),
                    // The rest of this text is abandoned; the source of the
                    // trouble is the program stream itself.
                    Err(err) => {
                        self.popped.clear();
                        self.recover(Object::executable(Value::File(crate::object::FileHandle::Stdout)), err)
                    }
                }
            }
            _ => {
                let frame = self.estack.pop().unwrap();
                match self.run_frame(frame) {
                    Ok(()) => Ok(()),
                    Err(err) => {
                        self.popped.clear();
                        self.recover(Object::null(), err)
                    }
                }
            }
        }
    }

    /// Execute one object fetched by the main loop, recovering from any
    /// recoverable error it raises
    fn exec_top(&mut self, obj: Object) -> PsResult<()> {
        self.popped.clear();
        if self.ostack.len() > OSTACK_LIMIT {
            let err = anyhow::anyhow!(Tilted::new(ErrorKind::StackOverflow));
            return self.recover(obj, err);
        }
        match self.exec_obj(obj.clone(), true) {
            Ok(()) => Ok(()),
            Err(err) => self.recover(obj, err),
        }
    }

    /// The error funnel: restore the operands the failing operator popped,
    /// push the offending object, and hand control to `errordict`
    fn recover(&mut self, obj: Object, err: anyhow::Error) -> PsResult<()> {
        if err.is::<FatalTilt>() {
            return Err(err);
        }
        let Some(tilted) = err.downcast_ref::<Tilted>() else {
            return Err(err);
        };
        let kind = tilted.kind;
        log::debug!("funnel: {} raised by {}", tilted, obj.op_eqeq(&self.vm));

        let popped = std::mem::take(&mut self.popped);
        for o in popped.into_iter().rev() {
            self.ostack.push(o);
        }
        self.ostack.push(obj);

        // A full execution stack must not keep the handler from running;
        // the frames shed here belong to the runaway program.
        if self.estack.len() + 8 > ESTACK_LIMIT {
            self.estack.truncate(ESTACK_LIMIT - 8);
        }

        let key = PsString::from_str(kind.name());
        let handler = self.vm.dict_payload(self.errordict).map.get(&key).cloned();
        match handler {
            Some(h) => self.exec_obj(h, false),
            None => Err(err),
        }
    }

    /// The dispatch rule. `direct` is true when the object came straight
    /// out of an execution frame, which makes an executable array a value
    /// (a procedure being passed around) rather than something to run
    pub(crate) fn exec_obj(&mut self, obj: Object, direct: bool) -> PsResult<()> {
        let mut obj = obj;
        let mut direct = direct;
        let mut hops = 0usize;
        loop {
            if obj.literal {
                self.opush(obj);
                return Ok(());
            }
            match obj.value {
                Value::Name(ref n) => {
                    hops += 1;
                    if hops > NAME_CHAIN_LIMIT {
                        tilt!(ExecStackOverflow, "name resolution chain too deep");
                    }
                    obj = self.lookup(n)?;
                    direct = false;
                }
                // Executing a bare null is a no-op.
                Value::Null => return Ok(()),
                // Deferred execution: the string becomes program text.
                Value::String(s) => {
                    let text = self.vm.str_bytes(s).to_vec();
                    return self.push_frame(ExecFrame::Source(Parser::new(text)));
                }
                Value::Array(arr) => {
                    return if direct {
                        self.opush(obj);
                        Ok(())
                    } else {
                        self.push_frame(ExecFrame::Objects { arr, cursor: 0 })
                    };
                }
                Value::Operator(op) => return self.execute(op),
                _ => {
                    self.opush(obj);
                    return Ok(());
                }
            }
        }
    }

    /// Scan the dictionary stack top-down for `name`
    pub(crate) fn lookup(&self, name: &PsString) -> PsResult<Object> {
        for d in self.dstack.iter().rev() {
            if let Some(obj) = self.vm.dict_payload(*d).map.get(name) {
                return Ok(obj.clone());
            }
        }
        anyhow::bail!(Tilted::with_info(ErrorKind::Undefined, name.to_text()))
    }

    pub(crate) fn lookup_quiet(&self, name: &PsString) -> Option<Object> {
        self.dstack
            .iter()
            .rev()
            .find_map(|d| self.vm.dict_payload(*d).map.get(name).cloned())
    }

    pub(crate) fn push_frame(&mut self, frame: ExecFrame) -> PsResult<()> {
        if self.estack.len() >= ESTACK_LIMIT {
            tilt!(ExecStackOverflow);
        }
        self.estack.push(frame);
        Ok(())
    }

    fn execute(&mut self, op: Operator) -> PsResult<()> {
        match op {
            Operator::Pop => self.pop(),
            Operator::Dup => self.dup(),
            Operator::Exch => self.exch(),
            Operator::Copy => self.copy(),
            Operator::Index => self.index(),
            Operator::Roll => self.roll(),
            Operator::Clear => self.clear(),
            Operator::ClearToMark => self.cleartomark(),
            Operator::Count => self.count(),
            Operator::CountToMark => self.counttomark_op(),
            Operator::Mark => Ok(self.opush(Object::mark())),
            Operator::EndArray => self.end_array(),

            Operator::Add => self.arith(i32::checked_add, f64::add),
            Operator::Sub => self.arith(i32::checked_sub, f64::sub),
            Operator::Mul => self.arith(i32::checked_mul, f64::mul),
            Operator::Div => self.div(),
            Operator::IDiv => self.idiv(),
            Operator::Mod => self.mod_op(),
            Operator::Neg => self.neg(),
            Operator::Abs => self.abs(),
            Operator::Ceiling => self.float_unary(f64::ceil),
            Operator::Floor => self.float_unary(f64::floor),
            Operator::Round => self.float_unary(round_half_up),
            Operator::Truncate => self.float_unary(f64::trunc),
            Operator::Sqrt => self.sqrt(),
            Operator::Exp => self.exp(),
            Operator::Ln => self.ln(),
            Operator::Log => self.log(),
            Operator::Sin => self.sin(),
            Operator::Cos => self.cos(),
            Operator::Atan => self.atan(),
            Operator::Rand => self.rand(),
            Operator::SRand => self.srand(),
            Operator::RRand => self.rrand(),

            Operator::Eq => self.eq(),
            Operator::Ne => self.ne(),
            Operator::Ge => self.cmp(|a, b| a >= b, |a, b| a >= b),
            Operator::Gt => self.cmp(|a, b| a > b, |a, b| a > b),
            Operator::Le => self.cmp(|a, b| a <= b, |a, b| a <= b),
            Operator::Lt => self.cmp(|a, b| a < b, |a, b| a < b),
            Operator::And => self.logic(|a, b| a && b, |a, b| a & b),
            Operator::Or => self.logic(|a, b| a || b, |a, b| a | b),
            Operator::Xor => self.logic(|a, b| a != b, |a, b| a ^ b),
            Operator::Not => self.not(),

            Operator::If => self.if_op(),
            Operator::IfElse => self.if_else(),
            Operator::For => self.for_op(),
            Operator::Forall => self.forall(),
            Operator::Repeat => self.repeat(),
            Operator::Loop => self.loop_op(),
            Operator::Exit => self.exit(),
            Operator::Stop => self.stop(),
            Operator::Stopped => self.stopped(),
            Operator::Quit => self.quit(),
            Operator::Exec => self.exec_op(),

            Operator::Array => self.array(),
            Operator::Length => self.length(),
            Operator::Get => self.get(),
            Operator::GetInterval => self.getinterval(),
            Operator::Put => self.put(),
            Operator::PutInterval => self.putinterval(),
            Operator::ALoad => self.aload(),
            Operator::AStore => self.astore(),
            Operator::Dict => self.dict(),
            Operator::Begin => self.begin(),
            Operator::End => self.end(),
            Operator::Def => self.def(),
            Operator::Load => self.load(),
            Operator::Store => self.store(),
            Operator::Known => self.known(),
            Operator::Where => self.where_op(),
            Operator::Undef => self.undef(),
            Operator::CurrentDict => self.current_dict(),
            Operator::CountDictStack => self.countdictstack(),
            Operator::ClearDictStack => self.cleardictstack(),
            Operator::MaxLength => self.max_length(),
            Operator::String => self.string(),
            Operator::Token => self.token(),
            Operator::Search => self.search(),
            Operator::AnchorSearch => self.anchorsearch(),

            Operator::Type => self.object_type(),
            Operator::Cvi => self.cvi(),
            Operator::Cvlit => self.cvlit(),
            Operator::Cvn => self.cvn(),
            Operator::Cvr => self.cvr(),
            Operator::Cvrs => self.cvrs(),
            Operator::Cvs => self.cvs(),
            Operator::Cvx => self.cvx(),
            Operator::XCheck => self.xcheck(),

            Operator::Save => self.save(),
            Operator::Restore => self.restore(),

            Operator::EqPrint => self.print_eq(),
            Operator::EqEqPrint => self.print_eqeq(),
            Operator::Print => self.print(),
            Operator::PStack => self.pstack(),
            Operator::Stack => self.stack(),

            Operator::ErrorDefault => self.std_error_handler(),
            Operator::HandleError => self.handle_error(),

            Operator::True => Ok(self.opush(Object::from(true))),
            Operator::False => Ok(self.opush(Object::from(false))),
            Operator::Null => Ok(self.opush(Object::null())),
            Operator::Bind => self.bind(),
            Operator::UserTime => self.usertime(),

            Operator::GSave => Ok(self.graphics.gsave(false)),
            Operator::GRestore => Ok(self.graphics.grestore()),
            Operator::NewPath => Ok(self.graphics.newpath()),
            Operator::MoveTo => self.moveto(),
            Operator::LineTo => self.lineto(),
            Operator::CurveTo => self.curveto(),
            Operator::ClosePath => Ok(self.graphics.closepath()),
            Operator::CurrentPoint => self.currentpoint(),
            Operator::PathForall => self.pathforall(),
            Operator::Clip => Ok(self.graphics.clip()),
            Operator::ShowPage => self.showpage(),
            Operator::SetLineWidth => self.setlinewidth(),
            Operator::SetLineCap => self.setlinecap(),
            Operator::SetLineJoin => self.setlinejoin(),
            Operator::SetMiterLimit => self.setmiterlimit(),
            Operator::SetDash => self.setdash(),
            Operator::SetGray => self.setgray(),
            Operator::SetRgbColor => self.setrgbcolor(),
        }
    }
}

/// Operand stack plumbing
impl Interpreter {
    pub(crate) fn opush(&mut self, obj: Object) {
        self.ostack.push(obj);
    }

    pub(crate) fn opop(&mut self) -> PsResult<Object> {
        match self.ostack.pop() {
            Some(obj) => {
                self.popped.push(obj.clone());
                Ok(obj)
            }
            None => tilt!(StackUnderflow),
        }
    }

    /// Remove the top n operands, returned bottom first
    pub(crate) fn opopn(&mut self, n: usize) -> PsResult<Vec<Object>> {
        self.ohas(n)?;
        let vals = self.ostack.split_off(self.ostack.len() - n);
        self.popped.extend(vals.iter().rev().cloned());
        Ok(vals)
    }

    fn ohas(&self, n: usize) -> PsResult<()> {
        if self.ostack.len() < n {
            tilt!(StackUnderflow);
        }
        Ok(())
    }

    fn otop(&self) -> PsResult<&Object> {
        match self.ostack.last() {
            Some(obj) => Ok(obj),
            None => tilt!(StackUnderflow),
        }
    }

    fn otop_mut(&mut self) -> PsResult<&mut Object> {
        match self.ostack.last_mut() {
            Some(obj) => Ok(obj),
            None => tilt!(StackUnderflow),
        }
    }

    pub(crate) fn pop_int(&mut self) -> PsResult<i32> {
        match self.opop()?.value {
            Value::Integer(i) => Ok(i),
            _ => tilt!(TypeCheck),
        }
    }

    pub(crate) fn pop_number(&mut self) -> PsResult<f64> {
        match self.opop()?.value {
            Value::Integer(i) => Ok(f64::from(i)),
            Value::Real(r) => Ok(r),
            _ => tilt!(TypeCheck),
        }
    }

    pub(crate) fn pop_bool(&mut self) -> PsResult<bool> {
        match self.opop()?.value {
            Value::Boolean(b) => Ok(b),
            _ => tilt!(TypeCheck),
        }
    }

    pub(crate) fn pop_dict(&mut self) -> PsResult<DictIndex> {
        match self.opop()?.value {
            Value::Dict(d) => Ok(d),
            _ => tilt!(TypeCheck),
        }
    }

    pub(crate) fn pop_string(&mut self) -> PsResult<StrRef> {
        match self.opop()?.value {
            Value::String(s) => Ok(s),
            _ => tilt!(TypeCheck),
        }
    }

    /// A procedure operand: an executable array, returned whole
    pub(crate) fn pop_proc(&mut self) -> PsResult<Object> {
        let obj = self.opop()?;
        match obj.value {
            Value::Array(_) if !obj.literal => Ok(obj),
            _ => tilt!(TypeCheck),
        }
    }

    /// A key operand: a name or a string, reduced to its bytes
    pub(crate) fn key_of(&self, obj: &Object) -> PsResult<PsString> {
        match &obj.value {
            Value::Name(n) => Ok(n.clone()),
            Value::String(s) => Ok(PsString::from_bytes(self.vm.str_bytes(*s).to_vec())),
            _ => tilt!(TypeCheck),
        }
    }

    pub(crate) fn counttomark(&self) -> PsResult<usize> {
        for (i, obj) in self.ostack.iter().rev().enumerate() {
            if matches!(obj.value, Value::Mark) {
                return Ok(i);
            }
        }
        tilt!(UnmatchedMark)
    }

    /// Insert under Level-1 capacity rules: a new key in a full dictionary
    /// is a dictfull
    pub(crate) fn dict_insert(&mut self, d: DictIndex, key: PsString, value: Object) -> PsResult<()> {
        let payload = self.vm.dict_payload(d);
        if !payload.map.contains_key(&key) && payload.map.len() >= payload.capacity {
            tilt!(DictFull);
        }
        self.vm.prep_dict_for_change(d);
        self.vm.dict_payload_mut(d).map.insert(key, value);
        Ok(())
    }

    fn dstack_dict_with(&self, key: &PsString) -> Option<DictIndex> {
        self.dstack
            .iter()
            .rev()
            .find(|d| self.vm.dict_payload(**d).map.contains_key(key))
            .copied()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> PsResult<()> {
        if self.out.write_all(bytes).is_err() {
            tilt!(IoError);
        }
        Ok(())
    }

    fn write_str(&mut self, s: &str) -> PsResult<()> {
        self.write_bytes(&latin1_bytes(s))
    }
}

/// Stack operators
impl Interpreter {
    fn pop(&mut self) -> PsResult<()> {
        self.opop()?;
        Ok(())
    }

    fn dup(&mut self) -> PsResult<()> {
        let obj = self.otop()?.clone();
        self.opush(obj);
        Ok(())
    }

    fn exch(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let [a, b] = <[Object; 2]>::try_from(vals).unwrap();
        self.opush(b);
        self.opush(a);
        Ok(())
    }

    fn copy(&mut self) -> PsResult<()> {
        if let Value::Integer(_) = self.otop()?.value {
            let n = self.pop_int()?;
            if n < 0 {
                tilt!(RangeCheck, "need 0 <= {}", n);
            }
            let n = n as usize;
            self.ohas(n)?;
            let start = self.ostack.len() - n;
            let copies = self.ostack[start..].to_vec();
            self.ostack.extend(copies);
            return Ok(());
        }

        let vals = self.opopn(2)?;
        let (src, dst) = (&vals[0], &vals[1]);
        match (&src.value, &dst.value) {
            (Value::Array(a), Value::Array(b)) => {
                if a.len > b.len {
                    tilt!(RangeCheck);
                }
                let elems = self.vm.array_slice(*a).to_vec();
                self.vm.prep_array_for_change(b.idx);
                self.vm.array_slice_mut(*b)[..a.len].clone_from_slice(&elems);
                self.opush(Object {
                    literal: dst.literal,
                    value: Value::Array(ArrRef {
                        idx: b.idx,
                        start: b.start,
                        len: a.len,
                    }),
                });
            }
            (Value::String(a), Value::String(b)) => {
                if a.len > b.len {
                    tilt!(RangeCheck);
                }
                let bytes = self.vm.str_bytes(*a).to_vec();
                self.vm.str_bytes_mut(*b)[..a.len].copy_from_slice(&bytes);
                self.opush(Object {
                    literal: dst.literal,
                    value: Value::String(StrRef {
                        idx: b.idx,
                        start: b.start,
                        len: a.len,
                    }),
                });
            }
            (Value::Dict(a), Value::Dict(b)) => {
                let entries: Vec<_> = self
                    .vm
                    .dict_payload(*a)
                    .map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                let b = *b;
                for (k, v) in entries {
                    self.dict_insert(b, k, v)?;
                }
                self.opush(dst.clone());
            }
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn index(&mut self) -> PsResult<()> {
        let n = self.pop_int()?;
        if n < 0 {
            tilt!(RangeCheck, "need 0 <= {}", n);
        }
        let n = n as usize;
        self.ohas(n + 1)?;
        let obj = self.ostack[self.ostack.len() - 1 - n].clone();
        self.opush(obj);
        Ok(())
    }

    fn roll(&mut self) -> PsResult<()> {
        let j = self.pop_int()?;
        let n = self.pop_int()?;
        if n < 0 {
            tilt!(RangeCheck, "need 0 <= {}", n);
        }
        let n = n as usize;
        self.ohas(n)?;
        if n > 0 {
            let jm = j.rem_euclid(n as i32) as usize;
            let start = self.ostack.len() - n;
            self.ostack[start..].rotate_right(jm);
        }
        Ok(())
    }

    fn clear(&mut self) -> PsResult<()> {
        self.ostack.clear();
        Ok(())
    }

    fn cleartomark(&mut self) -> PsResult<()> {
        let n = self.counttomark()?;
        let new_len = self.ostack.len() - n - 1;
        self.ostack.truncate(new_len);
        Ok(())
    }

    fn count(&mut self) -> PsResult<()> {
        let n = self.ostack.len() as i32;
        self.opush(Object::from(n));
        Ok(())
    }

    fn counttomark_op(&mut self) -> PsResult<()> {
        let n = self.counttomark()? as i32;
        self.opush(Object::from(n));
        Ok(())
    }

    fn end_array(&mut self) -> PsResult<()> {
        let n = self.counttomark()?;
        let objs = self.opopn(n)?;
        self.opop()?; // the mark
        let arr = self.vm.new_array(objs);
        self.opush(Object::literal(Value::Array(arr)));
        Ok(())
    }
}

/// Math operators
impl Interpreter {
    fn arith(
        &mut self,
        checked: impl Fn(i32, i32) -> Option<i32>,
        real: impl Fn(f64, f64) -> f64,
    ) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let (a, b) = (&vals[0], &vals[1]);

        if let (Value::Integer(x), Value::Integer(y)) = (&a.value, &b.value) {
            // Integers stay integers while the true result fits.
            match checked(*x, *y) {
                Some(r) => self.opush(Object::from(r)),
                None => self.opush(Object::from(real(f64::from(*x), f64::from(*y)))),
            }
            return Ok(());
        }

        let (Some(x), Some(y)) = (a.num(), b.num()) else {
            tilt!(TypeCheck);
        };
        self.opush(Object::from(real(x, y)));
        Ok(())
    }

    fn div(&mut self) -> PsResult<()> {
        let y = self.pop_number()?;
        let x = self.pop_number()?;
        if y == 0.0 {
            tilt!(UndefinedResult, "division by zero");
        }
        self.opush(Object::from(x / y));
        Ok(())
    }

    fn idiv(&mut self) -> PsResult<()> {
        let y = self.pop_int()?;
        let x = self.pop_int()?;
        match x.checked_div(y) {
            Some(q) => {
                self.opush(Object::from(q));
                Ok(())
            }
            None => tilt!(UndefinedResult),
        }
    }

    fn mod_op(&mut self) -> PsResult<()> {
        let y = self.pop_int()?;
        let x = self.pop_int()?;
        match x.checked_rem(y) {
            Some(r) => {
                self.opush(Object::from(r));
                Ok(())
            }
            None => tilt!(UndefinedResult),
        }
    }

    fn neg(&mut self) -> PsResult<()> {
        match self.opop()?.value {
            Value::Integer(i) => match i.checked_neg() {
                Some(r) => self.opush(Object::from(r)),
                None => self.opush(Object::from(-f64::from(i))),
            },
            Value::Real(r) => self.opush(Object::from(-r)),
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn abs(&mut self) -> PsResult<()> {
        match self.opop()?.value {
            Value::Integer(i) => match i.checked_abs() {
                Some(r) => self.opush(Object::from(r)),
                None => self.opush(Object::from(f64::from(i).abs())),
            },
            Value::Real(r) => self.opush(Object::from(r.abs())),
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    /// ceiling, floor, round, truncate: integers pass through untouched
    fn float_unary(&mut self, f: impl Fn(f64) -> f64) -> PsResult<()> {
        let obj = self.opop()?;
        match obj.value {
            Value::Integer(_) => self.opush(obj),
            Value::Real(r) => self.opush(Object::from(f(r))),
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn sqrt(&mut self) -> PsResult<()> {
        let x = self.pop_number()?;
        if x < 0.0 {
            tilt!(RangeCheck, "sqrt of {}", x);
        }
        self.opush(Object::from(x.sqrt()));
        Ok(())
    }

    fn exp(&mut self) -> PsResult<()> {
        let exponent = self.pop_number()?;
        let base = self.pop_number()?;
        let r = base.powf(exponent);
        if !r.is_finite() {
            tilt!(UndefinedResult);
        }
        self.opush(Object::from(r));
        Ok(())
    }

    fn ln(&mut self) -> PsResult<()> {
        let x = self.pop_number()?;
        if x <= 0.0 {
            tilt!(RangeCheck, "ln of {}", x);
        }
        self.opush(Object::from(x.ln()));
        Ok(())
    }

    fn log(&mut self) -> PsResult<()> {
        let x = self.pop_number()?;
        if x <= 0.0 {
            tilt!(RangeCheck, "log of {}", x);
        }
        self.opush(Object::from(x.log10()));
        Ok(())
    }

    fn sin(&mut self) -> PsResult<()> {
        let x = self.pop_number()?;
        self.opush(Object::from(x.to_radians().sin()));
        Ok(())
    }

    fn cos(&mut self) -> PsResult<()> {
        let x = self.pop_number()?;
        self.opush(Object::from(x.to_radians().cos()));
        Ok(())
    }

    fn atan(&mut self) -> PsResult<()> {
        let den = self.pop_number()?;
        let num = self.pop_number()?;
        if num == 0.0 && den == 0.0 {
            tilt!(UndefinedResult);
        }
        let mut deg = num.atan2(den).to_degrees();
        if deg < 0.0 {
            deg += 360.0;
        }
        self.opush(Object::from(deg));
        Ok(())
    }

    fn rand(&mut self) -> PsResult<()> {
        self.rand_state = self
            .rand_state
            .wrapping_mul(1_103_515_245)
            .wrapping_add(12_345)
            & 0x7fff_ffff;
        self.opush(Object::from(self.rand_state as i32));
        Ok(())
    }

    fn srand(&mut self) -> PsResult<()> {
        let seed = self.pop_int()?;
        self.rand_state = (seed as u32) & 0x7fff_ffff;
        Ok(())
    }

    fn rrand(&mut self) -> PsResult<()> {
        self.opush(Object::from(self.rand_state as i32));
        Ok(())
    }
}

/// Relational, boolean, and bitwise operators
impl Interpreter {
    pub(crate) fn objects_equal(&self, a: &Object, b: &Object) -> bool {
        match (&a.value, &b.value) {
            (Value::Integer(x), Value::Integer(y)) => x == y,
            (Value::Real(x), Value::Real(y)) => x == y,
            (Value::Integer(x), Value::Real(y)) | (Value::Real(y), Value::Integer(x)) => {
                f64::from(*x) == *y
            }
            (Value::Boolean(x), Value::Boolean(y)) => x == y,
            (Value::Null, Value::Null) => true,
            (Value::Mark, Value::Mark) => true,
            (Value::Name(x), Value::Name(y)) => x == y,
            (Value::String(x), Value::String(y)) => {
                self.vm.str_bytes(*x) == self.vm.str_bytes(*y)
            }
            (Value::Name(n), Value::String(s)) | (Value::String(s), Value::Name(n)) => {
                n.as_bytes() == self.vm.str_bytes(*s)
            }
            // Composites are equal only when they share storage.
            (Value::Array(x), Value::Array(y)) => x == y,
            (Value::Dict(x), Value::Dict(y)) => x == y,
            (Value::Operator(x), Value::Operator(y)) => x == y,
            (Value::Save(x), Value::Save(y)) => x == y,
            (Value::File(x), Value::File(y)) => x == y,
            _ => false,
        }
    }

    fn eq(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let r = self.objects_equal(&vals[0], &vals[1]);
        self.opush(Object::from(r));
        Ok(())
    }

    fn ne(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let r = !self.objects_equal(&vals[0], &vals[1]);
        self.opush(Object::from(r));
        Ok(())
    }

    fn cmp(
        &mut self,
        num_cmp: impl Fn(f64, f64) -> bool,
        str_cmp: impl Fn(&[u8], &[u8]) -> bool,
    ) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let (a, b) = (&vals[0], &vals[1]);
        match (&a.value, &b.value) {
            (Value::String(x), Value::String(y)) => {
                let r = str_cmp(self.vm.str_bytes(*x), self.vm.str_bytes(*y));
                self.opush(Object::from(r));
            }
            _ => {
                let (Some(x), Some(y)) = (a.num(), b.num()) else {
                    tilt!(TypeCheck);
                };
                self.opush(Object::from(num_cmp(x, y)));
            }
        }
        Ok(())
    }

    fn logic(
        &mut self,
        bool_op: impl Fn(bool, bool) -> bool,
        int_op: impl Fn(i32, i32) -> i32,
    ) -> PsResult<()> {
        let vals = self.opopn(2)?;
        match (&vals[0].value, &vals[1].value) {
            (Value::Boolean(x), Value::Boolean(y)) => {
                self.opush(Object::from(bool_op(*x, *y)));
            }
            (Value::Integer(x), Value::Integer(y)) => {
                self.opush(Object::from(int_op(*x, *y)));
            }
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn not(&mut self) -> PsResult<()> {
        match self.opop()?.value {
            Value::Boolean(b) => self.opush(Object::from(!b)),
            Value::Integer(i) => self.opush(Object::from(!i)),
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }
}

/// Dictionary operators
impl Interpreter {
    fn dict(&mut self) -> PsResult<()> {
        let n = self.pop_int()?;
        if n < 0 {
            tilt!(RangeCheck, "need 0 <= {}", n);
        }
        let d = self.vm.new_dict(n as usize);
        self.opush(Object::literal(Value::Dict(d)));
        Ok(())
    }

    fn begin(&mut self) -> PsResult<()> {
        let d = self.pop_dict()?;
        self.dstack.push(d);
        Ok(())
    }

    fn end(&mut self) -> PsResult<()> {
        // systemdict and userdict stay put.
        if self.dstack.len() <= 2 {
            tilt!(DictStackUnderflow);
        }
        self.dstack.pop();
        Ok(())
    }

    fn def(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let key = self.key_of(&vals[0])?;
        let d = *self.dstack.last().unwrap();
        self.dict_insert(d, key, vals[1].clone())
    }

    fn load(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let key = self.key_of(&obj)?;
        let val = self.lookup(&key)?;
        self.opush(val);
        Ok(())
    }

    fn store(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let key = self.key_of(&vals[0])?;
        let d = self
            .dstack_dict_with(&key)
            .unwrap_or_else(|| *self.dstack.last().unwrap());
        self.dict_insert(d, key, vals[1].clone())
    }

    fn known(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let Value::Dict(d) = vals[0].value else {
            tilt!(TypeCheck);
        };
        let key = self.key_of(&vals[1])?;
        let r = self.vm.dict_payload(d).map.contains_key(&key);
        self.opush(Object::from(r));
        Ok(())
    }

    fn where_op(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let key = self.key_of(&obj)?;
        match self.dstack_dict_with(&key) {
            Some(d) => {
                self.opush(Object::literal(Value::Dict(d)));
                self.opush(Object::from(true));
            }
            None => self.opush(Object::from(false)),
        }
        Ok(())
    }

    fn undef(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let Value::Dict(d) = vals[0].value else {
            tilt!(TypeCheck);
        };
        let key = self.key_of(&vals[1])?;
        self.vm.prep_dict_for_change(d);
        self.vm.dict_payload_mut(d).map.remove(&key);
        Ok(())
    }

    fn current_dict(&mut self) -> PsResult<()> {
        let d = *self.dstack.last().unwrap();
        self.opush(Object::literal(Value::Dict(d)));
        Ok(())
    }

    fn countdictstack(&mut self) -> PsResult<()> {
        let n = self.dstack.len() as i32;
        self.opush(Object::from(n));
        Ok(())
    }

    fn cleardictstack(&mut self) -> PsResult<()> {
        self.dstack.truncate(2);
        Ok(())
    }

    fn max_length(&mut self) -> PsResult<()> {
        let d = self.pop_dict()?;
        let capacity = self.vm.dict_payload(d).capacity as i32;
        self.opush(Object::from(capacity));
        Ok(())
    }
}

/// Array and string operators
impl Interpreter {
    fn array(&mut self) -> PsResult<()> {
        let n = self.pop_int()?;
        if n < 0 {
            tilt!(RangeCheck, "need 0 <= {}", n);
        }
        let arr = self.vm.new_array(vec![Object::null(); n as usize]);
        self.opush(Object::literal(Value::Array(arr)));
        Ok(())
    }

    fn length(&mut self) -> PsResult<()> {
        let len = match self.opop()?.value {
            Value::Array(a) => a.len,
            Value::String(s) => s.len,
            Value::Dict(d) => self.vm.dict_payload(d).map.len(),
            Value::Name(n) => n.len(),
            _ => tilt!(TypeCheck),
        };
        self.opush(Object::from(len as i32));
        Ok(())
    }

    fn get(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        match vals[0].value {
            Value::Array(a) => {
                let Value::Integer(i) = vals[1].value else {
                    tilt!(TypeCheck);
                };
                if i < 0 || i as usize >= a.len {
                    tilt!(RangeCheck, "index {} beyond {}", i, a.len);
                }
                let elem = self.vm.array_slice(a)[i as usize].clone();
                self.opush(elem);
            }
            Value::Dict(d) => {
                let key = self.key_of(&vals[1])?;
                match self.vm.dict_payload(d).map.get(&key) {
                    Some(v) => {
                        let v = v.clone();
                        self.opush(v);
                    }
                    None => anyhow::bail!(Tilted::with_info(ErrorKind::Undefined, key.to_text())),
                }
            }
            Value::String(s) => {
                let Value::Integer(i) = vals[1].value else {
                    tilt!(TypeCheck);
                };
                if i < 0 || i as usize >= s.len {
                    tilt!(RangeCheck, "index {} beyond {}", i, s.len);
                }
                let byte = self.vm.str_bytes(s)[i as usize];
                self.opush(Object::from(i32::from(byte)));
            }
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn getinterval(&mut self) -> PsResult<()> {
        let vals = self.opopn(3)?;
        let (Value::Integer(ind), Value::Integer(count)) = (&vals[1].value, &vals[2].value) else {
            tilt!(TypeCheck);
        };
        let (ind, count) = (*ind, *count);
        if ind < 0 || count < 0 {
            tilt!(RangeCheck);
        }
        let (ind, count) = (ind as usize, count as usize);
        match vals[0].value {
            Value::Array(a) => {
                if ind + count > a.len {
                    tilt!(RangeCheck);
                }
                self.opush(Object {
                    literal: vals[0].literal,
                    value: Value::Array(ArrRef {
                        idx: a.idx,
                        start: a.start + ind,
                        len: count,
                    }),
                });
            }
            Value::String(s) => {
                if ind + count > s.len {
                    tilt!(RangeCheck);
                }
                self.opush(Object {
                    literal: vals[0].literal,
                    value: Value::String(StrRef {
                        idx: s.idx,
                        start: s.start + ind,
                        len: count,
                    }),
                });
            }
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn put(&mut self) -> PsResult<()> {
        let vals = self.opopn(3)?;
        match vals[0].value {
            Value::Array(a) => {
                let Value::Integer(i) = vals[1].value else {
                    tilt!(TypeCheck);
                };
                if i < 0 || i as usize >= a.len {
                    tilt!(RangeCheck, "index {} beyond {}", i, a.len);
                }
                self.vm.prep_array_for_change(a.idx);
                self.vm.array_slice_mut(a)[i as usize] = vals[2].clone();
            }
            Value::Dict(d) => {
                let key = self.key_of(&vals[1])?;
                self.dict_insert(d, key, vals[2].clone())?;
            }
            Value::String(s) => {
                let Value::Integer(i) = vals[1].value else {
                    tilt!(TypeCheck);
                };
                let Value::Integer(byte) = vals[2].value else {
                    tilt!(TypeCheck);
                };
                if !(0..=255).contains(&byte) {
                    tilt!(RangeCheck, "need 0 <= {} <= 255", byte);
                }
                if i < 0 || i as usize >= s.len {
                    tilt!(RangeCheck, "index {} beyond {}", i, s.len);
                }
                self.vm.str_bytes_mut(s)[i as usize] = byte as u8;
            }
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn putinterval(&mut self) -> PsResult<()> {
        let vals = self.opopn(3)?;
        let Value::Integer(ind) = vals[1].value else {
            tilt!(TypeCheck);
        };
        if ind < 0 {
            tilt!(RangeCheck);
        }
        let ind = ind as usize;
        match (&vals[0].value, &vals[2].value) {
            (Value::Array(dst), Value::Array(src)) => {
                if ind + src.len > dst.len {
                    tilt!(RangeCheck);
                }
                let elems = self.vm.array_slice(*src).to_vec();
                self.vm.prep_array_for_change(dst.idx);
                self.vm.array_slice_mut(*dst)[ind..ind + elems.len()].clone_from_slice(&elems);
            }
            (Value::String(dst), Value::String(src)) => {
                if ind + src.len > dst.len {
                    tilt!(RangeCheck);
                }
                let bytes = self.vm.str_bytes(*src).to_vec();
                self.vm.str_bytes_mut(*dst)[ind..ind + bytes.len()].copy_from_slice(&bytes);
            }
            _ => tilt!(TypeCheck),
        }
        Ok(())
    }

    fn aload(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let Value::Array(a) = obj.value else {
            tilt!(TypeCheck);
        };
        for elem in self.vm.array_slice(a).to_vec() {
            self.opush(elem);
        }
        self.opush(obj);
        Ok(())
    }

    fn astore(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let Value::Array(a) = obj.value else {
            tilt!(TypeCheck);
        };
        let vals = self.opopn(a.len)?;
        self.vm.prep_array_for_change(a.idx);
        self.vm.array_slice_mut(a).clone_from_slice(&vals);
        self.opush(obj);
        Ok(())
    }

    fn string(&mut self) -> PsResult<()> {
        let n = self.pop_int()?;
        if n < 0 {
            tilt!(RangeCheck, "need 0 <= {}", n);
        }
        let s = self.vm.new_string(vec![0; n as usize]);
        self.opush(Object::literal(Value::String(s)));
        Ok(())
    }

    fn search(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let (Value::String(hay), Value::String(needle)) = (&vals[0].value, &vals[1].value) else {
            tilt!(TypeCheck);
        };
        let (hay, needle) = (*hay, *needle);
        let hay_bytes = self.vm.str_bytes(hay).to_vec();
        let needle_bytes = self.vm.str_bytes(needle).to_vec();

        let pos = if needle_bytes.is_empty() {
            Some(0)
        } else {
            hay_bytes
                .windows(needle_bytes.len())
                .position(|w| w == needle_bytes)
        };

        match pos {
            Some(pos) => {
                let nlen = needle_bytes.len();
                let sub = |start, len| Object {
                    literal: vals[0].literal,
                    value: Value::String(StrRef {
                        idx: hay.idx,
                        start: hay.start + start,
                        len,
                    }),
                };
                self.opush(sub(pos + nlen, hay.len - pos - nlen));
                self.opush(sub(pos, nlen));
                self.opush(sub(0, pos));
                self.opush(Object::from(true));
            }
            None => {
                self.opush(vals[0].clone());
                self.opush(Object::from(false));
            }
        }
        Ok(())
    }

    fn anchorsearch(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let (Value::String(hay), Value::String(needle)) = (&vals[0].value, &vals[1].value) else {
            tilt!(TypeCheck);
        };
        let (hay, needle) = (*hay, *needle);
        let hay_bytes = self.vm.str_bytes(hay).to_vec();
        let needle_bytes = self.vm.str_bytes(needle).to_vec();

        if hay_bytes.starts_with(&needle_bytes) {
            let nlen = needle_bytes.len();
            let sub = |start, len| Object {
                literal: vals[0].literal,
                value: Value::String(StrRef {
                    idx: hay.idx,
                    start: hay.start + start,
                    len,
                }),
            };
            self.opush(sub(nlen, hay.len - nlen));
            self.opush(sub(0, nlen));
            self.opush(Object::from(true));
        } else {
            self.opush(vals[0].clone());
            self.opush(Object::from(false));
        }
        Ok(())
    }

    fn token(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let Value::String(s) = obj.value else {
            tilt!(TypeCheck);
        };
        let text = self.vm.str_bytes(s).to_vec();
        let mut parser = Parser::new(text);
        match parser.next_object(&mut self.vm)? {
            Some(tok) => {
                let consumed = parser.consumed().min(s.len);
                self.opush(Object {
                    literal: obj.literal,
                    value: Value::String(StrRef {
                        idx: s.idx,
                        start: s.start + consumed,
                        len: s.len - consumed,
                    }),
                });
                self.opush(tok);
                self.opush(Object::from(true));
            }
            None => self.opush(Object::from(false)),
        }
        Ok(())
    }
}

/// Type, attribute, and conversion operators
impl Interpreter {
    fn object_type(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let name = format!("{}type", obj.type_name());
        self.opush(Object::name(&name, false));
        Ok(())
    }

    fn cvlit(&mut self) -> PsResult<()> {
        self.otop_mut()?.literal = true;
        Ok(())
    }

    fn cvx(&mut self) -> PsResult<()> {
        self.otop_mut()?.literal = false;
        Ok(())
    }

    fn xcheck(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        self.opush(Object::from(!obj.literal));
        Ok(())
    }

    fn cvi(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let value = match obj.value {
            Value::Integer(_) => obj,
            Value::Real(r) => Object::from(real_to_int(r)?),
            Value::String(s) => {
                let text = self.vm.str_bytes(s).to_vec();
                let mut lexer = crate::lexer::Lexer::new(text);
                match lexer.next_token(&mut self.vm)? {
                    Some(tok) => match tok.value {
                        Value::Integer(_) => tok,
                        Value::Real(r) => Object::from(real_to_int(r)?),
                        _ => tilt!(TypeCheck),
                    },
                    None => tilt!(TypeCheck),
                }
            }
            _ => tilt!(TypeCheck),
        };
        self.opush(value);
        Ok(())
    }

    fn cvr(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let r = match obj.value {
            Value::Integer(i) => f64::from(i),
            Value::Real(r) => r,
            Value::String(s) => {
                let text = crate::object::latin1_string(self.vm.str_bytes(s));
                match text.trim().parse::<f64>() {
                    Ok(r) => r,
                    Err(_) => tilt!(UndefinedResult, "cvr of {:?}", text),
                }
            }
            _ => tilt!(TypeCheck),
        };
        self.opush(Object::from(r));
        Ok(())
    }

    fn cvn(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let Value::String(s) = obj.value else {
            tilt!(TypeCheck);
        };
        let bytes = self.vm.str_bytes(s).to_vec();
        self.opush(Object {
            literal: obj.literal,
            value: Value::Name(PsString::from_bytes(bytes)),
        });
        Ok(())
    }

    fn cvs(&mut self) -> PsResult<()> {
        let vals = self.opopn(2)?;
        let Value::String(s) = vals[1].value else {
            tilt!(TypeCheck);
        };
        let text = latin1_bytes(&vals[0].op_eq(&self.vm));
        if text.len() > s.len {
            tilt!(RangeCheck, "{} bytes into a {} byte string", text.len(), s.len);
        }
        self.vm.str_bytes_mut(s)[..text.len()].copy_from_slice(&text);
        self.opush(Object {
            literal: vals[1].literal,
            value: Value::String(StrRef {
                idx: s.idx,
                start: s.start,
                len: text.len(),
            }),
        });
        Ok(())
    }

    fn cvrs(&mut self) -> PsResult<()> {
        let vals = self.opopn(3)?;
        if !vals[0].is_number() {
            tilt!(TypeCheck);
        }
        let Value::Integer(radix) = vals[1].value else {
            tilt!(TypeCheck);
        };
        let Value::String(s) = vals[2].value else {
            tilt!(TypeCheck);
        };
        if !(2..=36).contains(&radix) {
            tilt!(RangeCheck, "radix {}", radix);
        }

        let text = if radix == 10 {
            latin1_bytes(&vals[0].op_eq(&self.vm))
        } else {
            // Negative numbers render as their 32-bit two's complement.
            let n = vals[0].num().unwrap().trunc() as i64;
            let mut n = n.rem_euclid(1 << 32) as u64;
            let mut digits = Vec::new();
            loop {
                digits.push(DIGITS[(n % radix as u64) as usize]);
                n /= radix as u64;
                if n == 0 {
                    break;
                }
            }
            digits.reverse();
            digits
        };

        if text.len() > s.len {
            tilt!(RangeCheck, "{} digits into a {} byte string", text.len(), s.len);
        }
        self.vm.str_bytes_mut(s)[..text.len()].copy_from_slice(&text);
        self.opush(Object {
            literal: vals[2].literal,
            value: Value::String(StrRef {
                idx: s.idx,
                start: s.start,
                len: text.len(),
            }),
        });
        Ok(())
    }
}

/// VM operators
impl Interpreter {
    fn save(&mut self) -> PsResult<()> {
        let idx = self.vm.new_save();
        self.opush(Object::literal(Value::Save(idx)));
        self.graphics.gsave(true);
        Ok(())
    }

    fn restore(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let Value::Save(idx) = obj.value else {
            tilt!(TypeCheck);
        };
        let record = self.vm.save_record(idx);
        if !record.valid {
            tilt!(InvalidRestore);
        }
        let serial = record.serial;

        // Validate everything before mutating anything.
        for o in &self.ostack {
            if self.is_post_save_composite(o, serial) {
                tilt!(InvalidRestore, "newer composite on the operand stack");
            }
        }
        for d in &self.dstack {
            if self.vm.dict_birth_serial(*d) >= serial {
                tilt!(InvalidRestore, "newer dict on the dictionary stack");
            }
        }

        self.vm.rollback_to(idx);
        self.graphics.restore_to_save();
        Ok(())
    }

    fn is_post_save_composite(&self, obj: &Object, serial: u32) -> bool {
        match obj.value {
            Value::Array(a) => self.vm.array_birth_serial(a.idx) >= serial,
            Value::Dict(d) => self.vm.dict_birth_serial(d) >= serial,
            _ => false,
        }
    }
}

/// Output operators
impl Interpreter {
    fn print_eq(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let text = obj.op_eq(&self.vm);
        self.write_str(&text)?;
        self.write_str("\n")
    }

    fn print_eqeq(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let text = obj.op_eqeq(&self.vm);
        self.write_str(&text)?;
        self.write_str("\n")
    }

    fn print(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let bytes = match &obj.value {
            Value::Name(n) => n.as_bytes().to_vec(),
            Value::String(s) => self.vm.str_bytes(*s).to_vec(),
            _ => tilt!(TypeCheck),
        };
        self.write_bytes(&bytes)
    }

    fn pstack(&mut self) -> PsResult<()> {
        let lines: Vec<String> = self.ostack.iter().rev().map(|o| o.op_eqeq(&self.vm)).collect();
        for line in lines {
            self.write_str(&line)?;
            self.write_str("\n")?;
        }
        Ok(())
    }

    fn stack(&mut self) -> PsResult<()> {
        let lines: Vec<String> = self.ostack.iter().rev().map(|o| o.op_eq(&self.vm)).collect();
        for line in lines {
            self.write_str(&line)?;
            self.write_str("\n")?;
        }
        Ok(())
    }
}

/// Error operators
impl Interpreter {
    /// The handler installed in `errordict` for every error name: record
    /// the failure in `$error`, then stop
    fn std_error_handler(&mut self) -> PsResult<()> {
        let errname = self.opop()?;
        let command = self.opop()?;
        let d = self.dollar_error;
        self.dict_insert(d, PsString::from_str("newerror"), Object::from(true))?;
        self.dict_insert(d, PsString::from_str("errorname"), errname)?;
        self.dict_insert(d, PsString::from_str("command"), command)?;
        self.stop()
    }

    /// Report the error recorded in `$error`, if any, and clear it
    pub(crate) fn handle_error(&mut self) -> PsResult<()> {
        let d = self.dollar_error;
        let field = |interp: &Self, name: &str| {
            interp
                .vm
                .dict_payload(d)
                .map
                .get(&PsString::from_str(name))
                .cloned()
                .unwrap_or_else(Object::null)
        };

        if field(self, "newerror").value != Value::Boolean(true) {
            return Ok(());
        }

        let errorname = field(self, "errorname").op_eq(&self.vm);
        let command = field(self, "command").op_eqeq(&self.vm);
        let mut report = format!(
            "Error: {} in {}\nOperand stack ({}):\n",
            errorname,
            command,
            self.ostack.len()
        );
        for o in self.ostack.iter().rev() {
            report.push_str(&o.op_eqeq(&self.vm));
            report.push('\n');
        }

        self.dict_insert(d, PsString::from_str("newerror"), Object::from(false))?;
        self.write_str(&report)
    }
}

/// Miscellaneous operators
impl Interpreter {
    fn bind(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        let Value::Array(arr) = obj.value else {
            tilt!(TypeCheck);
        };
        let mut visited = Vec::new();
        self.bind_proc(arr, &mut visited);
        self.opush(obj);
        Ok(())
    }

    fn bind_proc(&mut self, arr: ArrRef, visited: &mut Vec<crate::vm::ArrayIndex>) {
        if visited.contains(&arr.idx) {
            return;
        }
        visited.push(arr.idx);
        for i in 0..arr.len {
            let elem = self.vm.array_slice(arr)[i].clone();
            match &elem.value {
                Value::Array(inner) => self.bind_proc(*inner, visited),
                Value::Name(n) if !elem.literal => {
                    if let Some(found) = self.lookup_quiet(n) {
                        if matches!(found.value, Value::Operator(_)) {
                            self.vm.prep_array_for_change(arr.idx);
                            self.vm.array_slice_mut(arr)[i] = Object::executable(found.value);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    fn usertime(&mut self) -> PsResult<()> {
        let ms = self.started.elapsed().as_millis().min(i32::MAX as u128) as i32;
        self.opush(Object::from(ms));
        Ok(())
    }
}

/// Graphics boundary operators
impl Interpreter {
    fn moveto(&mut self) -> PsResult<()> {
        let y = self.pop_number()?;
        let x = self.pop_number()?;
        self.graphics.moveto(x, y);
        Ok(())
    }

    fn lineto(&mut self) -> PsResult<()> {
        let y = self.pop_number()?;
        let x = self.pop_number()?;
        self.graphics.lineto(x, y)
    }

    fn curveto(&mut self) -> PsResult<()> {
        let y3 = self.pop_number()?;
        let x3 = self.pop_number()?;
        let y2 = self.pop_number()?;
        let x2 = self.pop_number()?;
        let y1 = self.pop_number()?;
        let x1 = self.pop_number()?;
        self.graphics.curveto(x1, y1, x2, y2, x3, y3)
    }

    fn currentpoint(&mut self) -> PsResult<()> {
        let (x, y) = self.graphics.current_point()?;
        self.opush(Object::from(x));
        self.opush(Object::from(y));
        Ok(())
    }

    fn showpage(&mut self) -> PsResult<()> {
        match self.graphics.showpage() {
            Some(filename) => log::info!("showpage: page {} -> {}", self.graphics.page, filename),
            None => log::debug!("showpage: page {} (no output file)", self.graphics.page),
        }
        Ok(())
    }

    fn setlinewidth(&mut self) -> PsResult<()> {
        let w = self.pop_number()?;
        self.graphics.state_mut().line_width = w;
        Ok(())
    }

    fn setlinecap(&mut self) -> PsResult<()> {
        let cap = self.pop_int()?;
        if !(0..=2).contains(&cap) {
            tilt!(RangeCheck, "line cap {}", cap);
        }
        self.graphics.state_mut().line_cap = cap;
        Ok(())
    }

    fn setlinejoin(&mut self) -> PsResult<()> {
        let join = self.pop_int()?;
        if !(0..=2).contains(&join) {
            tilt!(RangeCheck, "line join {}", join);
        }
        self.graphics.state_mut().line_join = join;
        Ok(())
    }

    fn setmiterlimit(&mut self) -> PsResult<()> {
        let limit = self.pop_number()?;
        if limit < 1.0 {
            tilt!(RangeCheck, "miter limit {}", limit);
        }
        self.graphics.state_mut().miter_limit = limit;
        Ok(())
    }

    fn setdash(&mut self) -> PsResult<()> {
        let offset = self.pop_number()?;
        let obj = self.opop()?;
        let Value::Array(a) = obj.value else {
            tilt!(TypeCheck);
        };
        let mut pattern = Vec::with_capacity(a.len);
        for elem in self.vm.array_slice(a).to_vec() {
            match elem.num() {
                Some(n) => pattern.push(n),
                None => tilt!(TypeCheck),
            }
        }
        self.graphics.state_mut().dash = (pattern, offset);
        Ok(())
    }

    fn setgray(&mut self) -> PsResult<()> {
        let g = self.pop_number()?.clamp(0.0, 1.0);
        self.graphics.state_mut().rgb = (g, g, g);
        Ok(())
    }

    fn setrgbcolor(&mut self) -> PsResult<()> {
        let b = self.pop_number()?.clamp(0.0, 1.0);
        let g = self.pop_number()?.clamp(0.0, 1.0);
        let r = self.pop_number()?.clamp(0.0, 1.0);
        self.graphics.state_mut().rgb = (r, g, b);
        Ok(())
    }
}

/// PSRM rounding: ties go to the greater integer
fn round_half_up(r: f64) -> f64 {
    let floor = r.floor();
    if r - floor >= 0.5 {
        floor + 1.0
    } else {
        floor
    }
}

fn real_to_int(r: f64) -> PsResult<i32> {
    let t = r.trunc();
    if t < f64::from(i32::MIN) || t > f64::from(i32::MAX) {
        tilt!(RangeCheck, "{} out of integer range", r);
    }
    Ok(t as i32)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::{cell::RefCell, rc::Rc};

    /// A clonable sink so tests can watch what the interpreter writes
    #[derive(Clone, Default)]
    pub(crate) struct SharedOutput(Rc<RefCell<Vec<u8>>>);

    impl SharedOutput {
        pub fn text(&self) -> String {
            crate::object::latin1_string(&self.0.borrow())
        }
    }

    impl Write for SharedOutput {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    pub(crate) fn interp_with_output() -> (Interpreter, SharedOutput) {
        let out = SharedOutput::default();
        (Interpreter::with_output(Box::new(out.clone())), out)
    }

    /// Run a program to completion and hand back the interpreter
    pub(crate) fn evaluate(src: &str) -> Interpreter {
        let (mut interp, _) = interp_with_output();
        interp.add_text(src.as_bytes());
        interp.run().unwrap();
        interp
    }

    pub(crate) fn evaluate_with_output(src: &str) -> (Interpreter, SharedOutput) {
        let (mut interp, out) = interp_with_output();
        interp.add_text(src.as_bytes());
        interp.run().unwrap();
        (interp, out)
    }

    /// Run a failing program through the errordict funnel; the default
    /// handler records the error and stops, which is fatal at top level.
    /// Returns the interpreter and the `$error` error name
    pub(crate) fn evaluate_err(src: &str) -> (Interpreter, String) {
        let (mut interp, _) = interp_with_output();
        interp.add_text(src.as_bytes());
        let err = interp.run().unwrap_err();
        let fatal = err
            .downcast_ref::<FatalTilt>()
            .expect("expected fatal termination");
        assert_ne!(fatal.status, 0, "program: {}", src);
        let name = error_name(&interp);
        (interp, name)
    }

    /// The `$error` error name, or "" when nothing has been recorded
    pub(crate) fn error_name(interp: &Interpreter) -> String {
        interp
            .vm
            .dict_payload(interp.dollar_error)
            .map
            .get(&PsString::from_str("errorname"))
            .filter(|o| o.value != Value::Null)
            .map(|o| o.op_eq(&interp.vm))
            .unwrap_or_default()
    }

    /// Assert the next operand is a string with the given contents
    macro_rules! assert_string {
        ($interp:ident, $str:literal) => {
            let s = $interp.pop_string().unwrap();
            assert_eq!($interp.vm.str_bytes(s), $str);
        };
    }

    macro_rules! assert_errors {
        ($src:expr, $name:expr) => {
            let (_interp, name) = evaluate_err($src);
            assert_eq!(name, $name, "program: {}", $src);
        };
    }

    pub(crate) use {assert_errors, assert_string};
}
