//! The graphics-context boundary. The engine only needs gstate
//! save/restore pairing, path and current-point bookkeeping, and the paint
//! parameters; rendering itself lives behind this interface and is not the
//! interpreter's concern.

use crate::error::{tilt, PsResult};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum PathSeg {
    MoveTo(f64, f64),
    LineTo(f64, f64),
    CurveTo(f64, f64, f64, f64, f64, f64),
    Close,
}

// The paint and transform fields are held for the rendering back end; the
// interpreter itself only writes them.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub(crate) struct Gstate {
    pub ctm: [f64; 6],
    pub path: Vec<PathSeg>,
    pub current_point: Option<(f64, f64)>,
    subpath_start: Option<(f64, f64)>,
    pub rgb: (f64, f64, f64),
    pub line_width: f64,
    pub line_cap: i32,
    pub line_join: i32,
    pub miter_limit: f64,
    pub dash: (Vec<f64>, f64),
    pub clip: Option<Vec<PathSeg>>,
}

impl Gstate {
    fn new() -> Self {
        Self {
            ctm: [1.0, 0.0, 0.0, 1.0, 0.0, 0.0],
            path: Vec::new(),
            current_point: None,
            subpath_start: None,
            rgb: (0.0, 0.0, 0.0),
            line_width: 1.0,
            line_cap: 0,
            line_join: 0,
            miter_limit: 10.0,
            dash: (Vec::new(), 0.0),
            clip: None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct GraphicsContext {
    gstate: Gstate,
    stack: Vec<(Gstate, bool)>,
    pub page: u32,
    pub outfile: Option<String>,
}

impl GraphicsContext {
    pub fn new() -> Self {
        Self {
            gstate: Gstate::new(),
            stack: Vec::new(),
            page: 0,
            outfile: None,
        }
    }

    /// Push a copy of the current state. `from_save` marks the entries that
    /// pair with the interpreter's save points
    pub fn gsave(&mut self, from_save: bool) {
        self.stack.push((self.gstate.clone(), from_save));
    }

    /// Pop back to the previous state. A save-paired entry is restored but
    /// left on the stack; only `restore` consumes it
    pub fn grestore(&mut self) {
        match self.stack.last() {
            Some((state, true)) => self.gstate = state.clone(),
            Some(_) => self.gstate = self.stack.pop().unwrap().0,
            None => {}
        }
    }

    /// The grestoreall performed by `restore`: unwind to and consume the
    /// innermost save-paired entry
    pub fn restore_to_save(&mut self) {
        while let Some((state, from_save)) = self.stack.pop() {
            if from_save {
                self.gstate = state;
                return;
            }
        }
    }

    pub fn current_point(&self) -> PsResult<(f64, f64)> {
        match self.gstate.current_point {
            Some(pt) => Ok(pt),
            None => tilt!(NoCurrentPoint),
        }
    }

    pub fn newpath(&mut self) {
        self.gstate.path.clear();
        self.gstate.current_point = None;
        self.gstate.subpath_start = None;
    }

    pub fn moveto(&mut self, x: f64, y: f64) {
        self.gstate.path.push(PathSeg::MoveTo(x, y));
        self.gstate.current_point = Some((x, y));
        self.gstate.subpath_start = Some((x, y));
    }

    pub fn lineto(&mut self, x: f64, y: f64) -> PsResult<()> {
        self.current_point()?;
        self.gstate.path.push(PathSeg::LineTo(x, y));
        self.gstate.current_point = Some((x, y));
        Ok(())
    }

    pub fn curveto(
        &mut self,
        x1: f64,
        y1: f64,
        x2: f64,
        y2: f64,
        x3: f64,
        y3: f64,
    ) -> PsResult<()> {
        self.current_point()?;
        self.gstate.path.push(PathSeg::CurveTo(x1, y1, x2, y2, x3, y3));
        self.gstate.current_point = Some((x3, y3));
        Ok(())
    }

    pub fn closepath(&mut self) {
        if self.gstate.path.is_empty() {
            return;
        }
        self.gstate.path.push(PathSeg::Close);
        self.gstate.current_point = self.gstate.subpath_start;
    }

    pub fn path(&self) -> &[PathSeg] {
        &self.gstate.path
    }

    /// Adopt the current path as the clip region. Like the rest of the
    /// paint state this is bookkeeping for the back end
    pub fn clip(&mut self) {
        self.gstate.clip = Some(self.gstate.path.clone());
    }

    pub fn state_mut(&mut self) -> &mut Gstate {
        &mut self.gstate
    }

    /// Finish the page: bump the counter and start a fresh path. The caller
    /// decides what, if anything, to do with the page file name
    pub fn showpage(&mut self) -> Option<String> {
        self.page += 1;
        self.newpath();
        self.page_filename()
    }

    /// The `-o` template with `%d` replaced by the 1-based page number
    pub fn page_filename(&self) -> Option<String> {
        self.outfile
            .as_ref()
            .map(|t| t.replace("%d", &self.page.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn current_point_tracks_the_path() {
        let mut gc = GraphicsContext::new();
        assert!(gc.current_point().is_err());
        gc.moveto(1.0, 2.0);
        assert_eq!(gc.current_point().unwrap(), (1.0, 2.0));
        gc.lineto(3.0, 4.0).unwrap();
        assert_eq!(gc.current_point().unwrap(), (3.0, 4.0));
        gc.closepath();
        assert_eq!(gc.current_point().unwrap(), (1.0, 2.0));
        assert_eq!(gc.path().len(), 3);
    }

    #[test]
    fn lineto_without_a_point_fails() {
        let mut gc = GraphicsContext::new();
        assert!(gc.lineto(1.0, 1.0).is_err());
    }

    #[test]
    fn gsave_grestore_pairs() {
        let mut gc = GraphicsContext::new();
        gc.state_mut().line_width = 2.0;
        gc.gsave(false);
        gc.state_mut().line_width = 5.0;
        gc.grestore();
        assert_eq!(gc.state_mut().line_width, 2.0);
    }

    #[test]
    fn restore_unwinds_to_the_save_marker() {
        let mut gc = GraphicsContext::new();
        gc.state_mut().line_width = 2.0;
        gc.gsave(true);
        gc.state_mut().line_width = 3.0;
        gc.gsave(false);
        gc.state_mut().line_width = 4.0;
        gc.restore_to_save();
        assert_eq!(gc.state_mut().line_width, 2.0);
        // The marker has been consumed.
        gc.grestore();
        assert_eq!(gc.state_mut().line_width, 2.0);
    }

    #[test]
    fn grestore_at_a_save_marker_does_not_consume_it() {
        let mut gc = GraphicsContext::new();
        gc.state_mut().line_width = 2.0;
        gc.gsave(true);
        gc.state_mut().line_width = 7.0;
        gc.grestore();
        assert_eq!(gc.state_mut().line_width, 2.0);
        gc.state_mut().line_width = 9.0;
        gc.restore_to_save();
        assert_eq!(gc.state_mut().line_width, 2.0);
    }

    #[test]
    fn clip_adopts_the_current_path() {
        let mut gc = GraphicsContext::new();
        gc.moveto(0.0, 0.0);
        gc.lineto(5.0, 5.0).unwrap();
        let path = gc.path().to_vec();
        gc.clip();
        assert_eq!(gc.state_mut().clip.as_deref(), Some(path.as_slice()));
    }

    #[test]
    fn page_numbering_substitutes_into_the_template() {
        let mut gc = GraphicsContext::new();
        gc.outfile = Some("out-%d.svg".to_owned());
        assert_eq!(gc.showpage().unwrap(), "out-1.svg");
        assert_eq!(gc.showpage().unwrap(), "out-2.svg");
    }
}
