//! Continuation frames and the control-flow operators.
//!
//! Control operators never loop in Rust: each pushes a frame onto the
//! execution stack that makes one step of progress per main-loop turn and
//! reschedules itself while steps remain. That keeps PostScript recursion
//! depth independent of the host stack and makes `exit` and `stop` plain
//! pops of the execution stack.

use crate::{
    error::{tilt, FatalTilt, PsResult},
    graphics::PathSeg,
    interpreter::Interpreter,
    object::{ArrRef, Object, PsString, StrRef, Value},
    parser::Parser,
};

/// One unit of suspended work on the execution stack
#[derive(Debug)]
pub(crate) enum ExecFrame {
    /// Iterator over the objects of an executable array
    Objects { arr: ArrRef, cursor: usize },

    /// A reader over program text: top-level source, or a string being
    /// executed (deferred execution)
    Source(Parser),

    For(ForFrame),
    Repeat { count: i32, proc: Object },
    Loop { proc: Object },
    ForallArray { arr: ArrRef, cursor: usize, proc: Object },
    ForallDict { items: Vec<(PsString, Object)>, cursor: usize, proc: Object },
    ForallString { s: StrRef, cursor: usize, proc: Object },

    /// Sentinel pushed by `stopped`: reached normally it reports false;
    /// `stop` consumes it and reports true
    Stopped,

    PathForall(PathForallFrame),
}

#[derive(Debug)]
pub(crate) struct ForFrame {
    control: f64,
    increment: f64,
    limit: f64,
    /// Both initial and increment were integers, so the control values are
    /// pushed as integers
    integral: bool,
    proc: Object,
}

#[derive(Debug)]
pub(crate) struct PathForallFrame {
    segs: Vec<PathSeg>,
    cursor: usize,
    move_proc: Object,
    line_proc: Object,
    curve_proc: Object,
    close_proc: Object,
}

impl ExecFrame {
    /// `exit` pops frames until it has popped an exitable one
    pub fn exitable(&self) -> bool {
        matches!(
            self,
            ExecFrame::For(_)
                | ExecFrame::Repeat { .. }
                | ExecFrame::Loop { .. }
                | ExecFrame::ForallArray { .. }
                | ExecFrame::ForallDict { .. }
                | ExecFrame::ForallString { .. }
                | ExecFrame::PathForall(_)
        )
    }

    /// `stop` pops frames until it has popped a stoppable one
    pub fn stoppable(&self) -> bool {
        matches!(self, ExecFrame::Stopped)
    }
}

impl Interpreter {
    /// Advance a native continuation by one step. The frame has already
    /// been popped; it pushes itself back if more steps remain
    pub(crate) fn run_frame(&mut self, frame: ExecFrame) -> PsResult<()> {
        match frame {
            ExecFrame::For(mut f) => {
                let done = if f.increment > 0.0 {
                    f.control > f.limit
                } else {
                    f.control < f.limit
                };
                if done {
                    return Ok(());
                }
                let val = if f.integral && f.control >= f64::from(i32::MIN) && f.control <= f64::from(i32::MAX) {
                    Object::from(f.control as i32)
                } else {
                    Object::from(f.control)
                };
                self.opush(val);
                f.control += f.increment;
                let proc = f.proc.clone();
                self.push_frame(ExecFrame::For(f))?;
                self.exec_obj(proc, false)
            }

            ExecFrame::Repeat { count, proc } => {
                if count == 0 {
                    return Ok(());
                }
                let body = proc.clone();
                self.push_frame(ExecFrame::Repeat { count: count - 1, proc })?;
                self.exec_obj(body, false)
            }

            ExecFrame::Loop { proc } => {
                let body = proc.clone();
                self.push_frame(ExecFrame::Loop { proc })?;
                self.exec_obj(body, false)
            }

            ExecFrame::ForallArray { arr, cursor, proc } => {
                if cursor >= arr.len {
                    return Ok(());
                }
                // Read through the live storage: mutations made by earlier
                // iterations are visible.
                let elem = self.vm.array_slice(arr)[cursor].clone();
                self.opush(elem);
                let body = proc.clone();
                self.push_frame(ExecFrame::ForallArray { arr, cursor: cursor + 1, proc })?;
                self.exec_obj(body, false)
            }

            ExecFrame::ForallDict { items, cursor, proc } => {
                let Some((key, value)) = items.get(cursor).cloned() else {
                    return Ok(());
                };
                self.opush(Object::literal(Value::Name(key)));
                self.opush(value);
                let body = proc.clone();
                self.push_frame(ExecFrame::ForallDict { items, cursor: cursor + 1, proc })?;
                self.exec_obj(body, false)
            }

            ExecFrame::ForallString { s, cursor, proc } => {
                if cursor >= s.len {
                    return Ok(());
                }
                let byte = self.vm.str_bytes(s)[cursor];
                self.opush(Object::from(i32::from(byte)));
                let body = proc.clone();
                self.push_frame(ExecFrame::ForallString { s, cursor: cursor + 1, proc })?;
                self.exec_obj(body, false)
            }

            ExecFrame::Stopped => {
                // Reached without an intervening stop.
                self.opush(Object::from(false));
                Ok(())
            }

            ExecFrame::PathForall(mut f) => {
                let Some(seg) = f.segs.get(f.cursor).copied() else {
                    return Ok(());
                };
                f.cursor += 1;
                let proc = match seg {
                    PathSeg::MoveTo(x, y) => {
                        self.opush(Object::from(x));
                        self.opush(Object::from(y));
                        f.move_proc.clone()
                    }
                    PathSeg::LineTo(x, y) => {
                        self.opush(Object::from(x));
                        self.opush(Object::from(y));
                        f.line_proc.clone()
                    }
                    PathSeg::CurveTo(x1, y1, x2, y2, x3, y3) => {
                        for v in [x1, y1, x2, y2, x3, y3] {
                            self.opush(Object::from(v));
                        }
                        f.curve_proc.clone()
                    }
                    PathSeg::Close => f.close_proc.clone(),
                };
                self.push_frame(ExecFrame::PathForall(f))?;
                self.exec_obj(proc, false)
            }

            ExecFrame::Objects { .. } | ExecFrame::Source(_) => {
                unreachable!("stepped by the main loop, not run_frame")
            }
        }
    }

    pub(crate) fn exec_op(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        self.exec_obj(obj, false)
    }

    pub(crate) fn if_op(&mut self) -> PsResult<()> {
        let proc = self.pop_proc()?;
        let b = self.pop_bool()?;
        if b {
            self.exec_obj(proc, false)?;
        }
        Ok(())
    }

    pub(crate) fn if_else(&mut self) -> PsResult<()> {
        let proc_else = self.pop_proc()?;
        let proc_if = self.pop_proc()?;
        let b = self.pop_bool()?;
        if b {
            self.exec_obj(proc_if, false)
        } else {
            self.exec_obj(proc_else, false)
        }
    }

    pub(crate) fn for_op(&mut self) -> PsResult<()> {
        let proc = self.pop_proc()?;
        let vals = self.opopn(3)?;
        let integral = matches!(
            (&vals[0].value, &vals[1].value),
            (Value::Integer(_), Value::Integer(_))
        );
        let (Some(initial), Some(increment), Some(limit)) =
            (vals[0].num(), vals[1].num(), vals[2].num())
        else {
            tilt!(TypeCheck);
        };
        self.push_frame(ExecFrame::For(ForFrame {
            control: initial,
            increment,
            limit,
            integral,
            proc,
        }))
    }

    pub(crate) fn repeat(&mut self) -> PsResult<()> {
        let proc = self.pop_proc()?;
        let count = self.pop_int()?;
        if count < 0 {
            tilt!(RangeCheck, "need 0 <= {}", count);
        }
        self.push_frame(ExecFrame::Repeat { count, proc })
    }

    pub(crate) fn loop_op(&mut self) -> PsResult<()> {
        let proc = self.pop_proc()?;
        self.push_frame(ExecFrame::Loop { proc })
    }

    pub(crate) fn forall(&mut self) -> PsResult<()> {
        let proc = self.pop_proc()?;
        let obj = self.opop()?;
        match obj.value {
            Value::Array(arr) => {
                self.push_frame(ExecFrame::ForallArray { arr, cursor: 0, proc })
            }
            Value::Dict(d) => {
                // Snapshot the entries; iteration order is unspecified by
                // the language, so make it reproducible.
                let mut items: Vec<(PsString, Object)> = self
                    .vm
                    .dict_payload(d)
                    .map
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect();
                items.sort_by(|a, b| a.0.cmp(&b.0));
                self.push_frame(ExecFrame::ForallDict { items, cursor: 0, proc })
            }
            Value::String(s) => {
                self.push_frame(ExecFrame::ForallString { s, cursor: 0, proc })
            }
            _ => tilt!(TypeCheck),
        }
    }

    /// Unwind to the innermost exitable frame. With no enclosing loop this
    /// escalates to quit
    pub(crate) fn exit(&mut self) -> PsResult<()> {
        while let Some(frame) = self.estack.pop() {
            if frame.exitable() {
                return Ok(());
            }
        }
        self.quit()
    }

    /// Unwind to the innermost stoppable frame. With none, the whole
    /// execution stack is gone: report any recorded error and return
    /// control to the host
    pub(crate) fn stop(&mut self) -> PsResult<()> {
        while let Some(frame) = self.estack.pop() {
            if frame.stoppable() {
                self.opush(Object::from(true));
                return Ok(());
            }
        }
        self.handle_error()?;
        anyhow::bail!(FatalTilt { status: 1 })
    }

    pub(crate) fn stopped(&mut self) -> PsResult<()> {
        let obj = self.opop()?;
        self.push_frame(ExecFrame::Stopped)?;
        self.exec_obj(obj, false)
    }

    pub(crate) fn quit(&mut self) -> PsResult<()> {
        anyhow::bail!(FatalTilt { status: 0 })
    }

    pub(crate) fn pathforall(&mut self) -> PsResult<()> {
        let close_proc = self.pop_proc()?;
        let curve_proc = self.pop_proc()?;
        let line_proc = self.pop_proc()?;
        let move_proc = self.pop_proc()?;
        let segs = self.graphics.path().to_vec();
        self.push_frame(ExecFrame::PathForall(PathForallFrame {
            segs,
            cursor: 0,
            move_proc,
            line_proc,
            curve_proc,
            close_proc,
        }))
    }
}

#[cfg(test)]
mod test {
    use crate::interpreter::testing::*;
    use crate::object::{Object, Value};

    #[test]
    fn for_accumulates() {
        let mut interp = evaluate("0 1 1 4 {add} for");
        assert_eq!(interp.opop().unwrap(), Object::from(10));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn for_leaves_control_values() {
        let mut interp = evaluate("1 2 6 {} for");
        assert_eq!(interp.opop().unwrap(), Object::from(5));
        assert_eq!(interp.opop().unwrap(), Object::from(3));
        assert_eq!(interp.opop().unwrap(), Object::from(1));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn for_counts_down_by_halves() {
        let mut interp = evaluate("3 -.5 1 {} for");
        for expected in [1.0, 1.5, 2.0, 2.5, 3.0] {
            assert_eq!(interp.opop().unwrap(), Object::from(expected));
        }
        assert!(interp.opop().is_err());
    }

    #[test]
    fn for_never_runs_when_initial_is_past_limit() {
        let mut interp = evaluate("10 1 5 {(a)} for");
        assert!(interp.opop().is_err());
    }

    #[test]
    fn for_body_sees_the_stack() {
        let mut interp = evaluate("1 1 5 { dup 3 gt { dup } if } for");
        for expected in [5, 5, 4, 4, 3, 2, 1] {
            assert_eq!(interp.opop().unwrap(), Object::from(expected));
        }
        assert!(interp.opop().is_err());
    }

    #[test]
    fn if_and_ifelse() {
        let mut interp = evaluate("(a) 3 4 lt {(3 < 4)} if");
        assert_string!(interp, b"3 < 4");
        assert_string!(interp, b"a");

        let mut interp = evaluate("(a) 3 4 gt {(3 > 4)} if");
        assert_string!(interp, b"a");
        assert!(interp.opop().is_err());

        let mut interp = evaluate("3 4 lt {(yes)} {(no)} ifelse");
        assert_string!(interp, b"yes");

        let mut interp = evaluate("3 4 gt {(yes)} {(no)} ifelse");
        assert_string!(interp, b"no");
    }

    #[test]
    fn repeat_counts() {
        let mut interp = evaluate("4 {(a)} repeat");
        for _ in 0..4 {
            assert_string!(interp, b"a");
        }
        assert!(interp.opop().is_err());

        let mut interp = evaluate("1 2 3 4 3 {pop} repeat");
        assert_eq!(interp.opop().unwrap(), Object::from(1));
        assert!(interp.opop().is_err());

        let mut interp = evaluate("99 0 {(a)} repeat");
        assert_eq!(interp.opop().unwrap(), Object::from(99));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn loop_runs_until_exit() {
        let mut interp = evaluate("0 { 1 add dup 5 ge { exit } if } loop");
        assert_eq!(interp.opop().unwrap(), Object::from(5));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn exit_pops_to_the_enclosing_loop() {
        let mut interp = evaluate("1 1 10 { dup 3 gt {exit} if } for");
        for expected in [4, 3, 2, 1] {
            assert_eq!(interp.opop().unwrap(), Object::from(expected));
        }
        assert!(interp.opop().is_err());

        let mut interp = evaluate("1 10 { dup 1 add dup 3 gt {exit} if } repeat");
        for expected in [4, 3, 2, 1] {
            assert_eq!(interp.opop().unwrap(), Object::from(expected));
        }
        assert!(interp.opop().is_err());
    }

    #[test]
    fn exit_without_a_loop_quits() {
        let (mut interp, _) = interp_with_output();
        interp.add_text(b"1 3 lt {exit} if");
        let err = interp.run().unwrap_err();
        let fatal = err.downcast_ref::<crate::error::FatalTilt>().unwrap();
        assert_eq!(fatal.status, 0);
    }

    #[test]
    fn forall_over_arrays() {
        let mut interp = evaluate("[ 1 2 (a) (b) 3] {} forall");
        assert_eq!(interp.opop().unwrap(), Object::from(3));
        assert_string!(interp, b"b");
        assert_string!(interp, b"a");
        assert_eq!(interp.opop().unwrap(), Object::from(2));
        assert_eq!(interp.opop().unwrap(), Object::from(1));

        let mut interp = evaluate("[] {} forall");
        assert!(interp.opop().is_err());
    }

    #[test]
    fn forall_can_exit_early() {
        let mut interp = evaluate("[ 1 2 (a) (b) 3 ] { dup type /integertype ne { exit } if } forall");
        assert_string!(interp, b"a");
        assert_eq!(interp.opop().unwrap(), Object::from(2));
        assert_eq!(interp.opop().unwrap(), Object::from(1));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn forall_sees_mutations() {
        let mut interp = evaluate("[1 2 3] dup 1 99 put {} forall");
        assert_eq!(interp.opop().unwrap(), Object::from(3));
        assert_eq!(interp.opop().unwrap(), Object::from(99));
        assert_eq!(interp.opop().unwrap(), Object::from(1));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn forall_over_dicts_pushes_pairs() {
        let mut interp = evaluate("2 dict dup /a 1 put dup /b 2 put { } forall");
        assert_eq!(interp.opop().unwrap(), Object::from(2));
        assert_eq!(interp.opop().unwrap(), Object::name("b", true));
        assert_eq!(interp.opop().unwrap(), Object::from(1));
        assert_eq!(interp.opop().unwrap(), Object::name("a", true));
    }

    #[test]
    fn stopped_reports_false_on_normal_completion() {
        let mut interp = evaluate("{ 1 2 add } stopped");
        assert_eq!(interp.opop().unwrap(), Object::from(false));
        assert_eq!(interp.opop().unwrap(), Object::from(3));
    }

    #[test]
    fn stop_unwinds_to_stopped() {
        let mut interp = evaluate("{ 1 2 add stop } stopped 99");
        assert_eq!(interp.opop().unwrap(), Object::from(99));
        assert_eq!(interp.opop().unwrap(), Object::from(true));
        assert_eq!(interp.opop().unwrap(), Object::from(3));
        assert!(interp.opop().is_err());
    }

    #[test]
    fn stop_without_stopped_is_fatal() {
        let (mut interp, _) = interp_with_output();
        interp.add_text(b"stop");
        let err = interp.run().unwrap_err();
        let fatal = err.downcast_ref::<crate::error::FatalTilt>().unwrap();
        assert_ne!(fatal.status, 0);
    }

    #[test]
    fn stopped_confines_errors() {
        // The default error handler stops; stopped catches it.
        let mut interp = evaluate("{ (a) 1 add } stopped");
        assert_eq!(interp.opop().unwrap(), Object::from(true));
    }

    #[test]
    fn quit_from_a_procedure() {
        let (mut interp, _) = interp_with_output();
        interp.add_text(b"{ quit } exec");
        let err = interp.run().unwrap_err();
        let fatal = err.downcast_ref::<crate::error::FatalTilt>().unwrap();
        assert_eq!(fatal.status, 0);
    }

    #[test]
    fn exec_runs_procedures_and_pushes_literals() {
        let mut interp = evaluate("{ 1 2 add } exec");
        assert_eq!(interp.opop().unwrap(), Object::from(3));

        let mut interp = evaluate("42 exec");
        assert_eq!(interp.opop().unwrap(), Object::from(42));

        let mut interp = evaluate("/dup exec");
        assert_eq!(interp.opop().unwrap(), Object::name("dup", true));
    }

    #[test]
    fn procedures_are_values_until_invoked() {
        // A nested procedure is pushed, not run.
        let mut interp = evaluate("{ {1} } exec");
        let proc = interp.opop().unwrap();
        assert!(!proc.literal);
        assert!(matches!(proc.value, Value::Array(_)));
    }

    #[test]
    fn control_errors() {
        assert_errors!("for", "stackunderflow");
        assert_errors!("1 1 {} for", "stackunderflow");
        assert_errors!("1 1 1 (a) for", "typecheck");
        assert_errors!("1 1 (a) {} for", "typecheck");
        assert_errors!("(a) 1 1 {} for", "typecheck");
        assert_errors!("1 {1} if", "typecheck");
        assert_errors!("true 1 if", "typecheck");
        assert_errors!("true {1} 2 ifelse", "typecheck");
        assert_errors!("(a) {} repeat", "typecheck");
        assert_errors!("1.5 {} repeat", "typecheck");
        assert_errors!("-2 {} repeat", "rangecheck");
        assert_errors!("[1 2 3] (a) forall", "typecheck");
        assert_errors!("123 {} forall", "typecheck");
    }

    #[test]
    fn deep_recursion_is_an_execstackoverflow() {
        assert_errors!("/f { f } def f", "execstackoverflow");
    }

    #[test]
    fn pathforall_replays_segments() {
        let mut interp = evaluate(
            "10 20 moveto 30 40 lineto closepath \
             { (m) } { (l) } { (c) } { (z) } pathforall",
        );
        assert_string!(interp, b"z");
        assert_string!(interp, b"l");
        assert_eq!(interp.opop().unwrap(), Object::from(40.0));
        assert_eq!(interp.opop().unwrap(), Object::from(30.0));
        assert_string!(interp, b"m");
        assert_eq!(interp.opop().unwrap(), Object::from(20.0));
        assert_eq!(interp.opop().unwrap(), Object::from(10.0));
        assert!(interp.opop().is_err());
    }
}
