//! Composite-object storage with save-point-scoped rollback.
//!
//! Arrays and dictionaries live in slab vectors owned by the VM and are
//! referenced by opaque index handles, so object graphs may freely contain
//! cycles (`systemdict` holds itself) and nothing relies on destructor
//! order. Slots are only ever appended: a handle stays valid for the life
//! of the engine. Each composite's payload is a stack of versions tagged
//! with the save point it belongs to; mutating a composite under a newer
//! save point first pushes a shallow copy, and `restore` pops versions
//! back off.

use std::collections::HashMap;

use crate::object::{ArrRef, Object, PsString, StrRef};

/// Handle to a mutable byte buffer (string storage)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct StringIndex(usize);

/// Handle to versioned array storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ArrayIndex(usize);

/// Handle to versioned dictionary storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct DictIndex(usize);

/// Handle to a save record; the payload of a save object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SaveIndex(usize);

/// A composite payload as a stack of versions, each tagged with the serial
/// of the save point under which it is active. The top version is current;
/// the bottom tag records when the composite was allocated
#[derive(Debug)]
pub(crate) struct Versioned<T> {
    versions: Vec<(u32, T)>,
}

impl<T: Clone> Versioned<T> {
    fn new(serial: u32, value: T) -> Self {
        Self {
            versions: vec![(serial, value)],
        }
    }

    pub fn current(&self) -> &T {
        &self.versions.last().unwrap().1
    }

    pub fn current_mut(&mut self) -> &mut T {
        &mut self.versions.last_mut().unwrap().1
    }

    pub fn birth_serial(&self) -> u32 {
        self.versions[0].0
    }

    pub fn top_serial(&self) -> u32 {
        self.versions.last().unwrap().0
    }

    /// Shadow the current version: push a shallow copy tagged with the
    /// save point it will belong to
    fn push_version(&mut self, serial: u32) {
        let copy = self.current().clone();
        self.versions.push((serial, copy));
    }

    fn pop_version(&mut self) {
        self.versions.pop();
        debug_assert!(!self.versions.is_empty());
    }

    #[cfg(test)]
    pub fn depth(&self) -> usize {
        self.versions.len()
    }
}

/// A dictionary's value: the map plus its Level-1 capacity
#[derive(Debug, Clone)]
pub(crate) struct DictPayload {
    pub map: HashMap<PsString, Object>,
    pub capacity: usize,
}

/// A composite shadowed under some save point, so its top version must be
/// popped when that save point is restored
#[derive(Debug, Clone, Copy)]
pub(crate) enum Touched {
    Array(ArrayIndex),
    Dict(DictIndex),
}

#[derive(Debug)]
pub(crate) struct SaveRecord {
    pub serial: u32,
    pub valid: bool,
    touched: Vec<Touched>,
}

/// All composite storage plus the save stack
#[derive(Debug)]
pub(crate) struct Vm {
    strings: Vec<Vec<u8>>,
    arrays: Vec<Versioned<Vec<Object>>>,
    dicts: Vec<Versioned<DictPayload>>,
    saves: Vec<SaveRecord>,
    sstack: Vec<SaveIndex>,
    next_serial: u32,
}

impl Vm {
    pub fn new() -> Self {
        let mut vm = Self {
            strings: Vec::new(),
            arrays: Vec::new(),
            dicts: Vec::new(),
            saves: Vec::new(),
            sstack: Vec::new(),
            next_serial: 0,
        };
        // The bottom save point is never restored; it anchors serial 0.
        vm.new_save();
        vm
    }

    pub fn current_serial(&self) -> u32 {
        let top = self.sstack.last().unwrap();
        self.saves[top.0].serial
    }

    pub fn new_save(&mut self) -> SaveIndex {
        let serial = self.next_serial;
        self.next_serial += 1;
        self.saves.push(SaveRecord {
            serial,
            valid: true,
            touched: Vec::new(),
        });
        let idx = SaveIndex(self.saves.len() - 1);
        self.sstack.push(idx);
        idx
    }

    pub fn save_record(&self, idx: SaveIndex) -> &SaveRecord {
        &self.saves[idx.0]
    }

    // Allocation

    pub fn new_string(&mut self, bytes: Vec<u8>) -> StrRef {
        let len = bytes.len();
        self.strings.push(bytes);
        StrRef {
            idx: StringIndex(self.strings.len() - 1),
            start: 0,
            len,
        }
    }

    pub fn new_array(&mut self, objs: Vec<Object>) -> ArrRef {
        let len = objs.len();
        self.arrays.push(Versioned::new(self.current_serial(), objs));
        ArrRef {
            idx: ArrayIndex(self.arrays.len() - 1),
            start: 0,
            len,
        }
    }

    pub fn new_dict(&mut self, capacity: usize) -> DictIndex {
        self.dicts.push(Versioned::new(
            self.current_serial(),
            DictPayload {
                map: HashMap::with_capacity(capacity),
                capacity,
            },
        ));
        DictIndex(self.dicts.len() - 1)
    }

    // Access. Strings are mutable in place and never versioned: their
    // mutations survive restore, a documented PostScript asymmetry.

    pub fn str_bytes(&self, r: StrRef) -> &[u8] {
        &self.strings[r.idx.0][r.start..r.start + r.len]
    }

    pub fn str_bytes_mut(&mut self, r: StrRef) -> &mut [u8] {
        &mut self.strings[r.idx.0][r.start..r.start + r.len]
    }

    pub fn array_slice(&self, r: ArrRef) -> &[Object] {
        &self.arrays[r.idx.0].current()[r.start..r.start + r.len]
    }

    pub fn array_slice_mut(&mut self, r: ArrRef) -> &mut [Object] {
        &mut self.arrays[r.idx.0].current_mut()[r.start..r.start + r.len]
    }

    pub fn dict_payload(&self, idx: DictIndex) -> &DictPayload {
        self.dicts[idx.0].current()
    }

    pub fn dict_payload_mut(&mut self, idx: DictIndex) -> &mut DictPayload {
        self.dicts[idx.0].current_mut()
    }

    pub fn array_birth_serial(&self, idx: ArrayIndex) -> u32 {
        self.arrays[idx.0].birth_serial()
    }

    pub fn dict_birth_serial(&self, idx: DictIndex) -> u32 {
        self.dicts[idx.0].birth_serial()
    }

    #[cfg(test)]
    pub(crate) fn array_version_depth(&self, idx: ArrayIndex) -> usize {
        self.arrays[idx.0].depth()
    }

    // Copy-on-write bookkeeping

    /// Call before mutating an array. If its top version belongs to an
    /// older save point, push a shallow copy tagged with the current one
    /// and record the array in the current save point's touched set
    pub fn prep_array_for_change(&mut self, idx: ArrayIndex) {
        let serial = self.current_serial();
        let versioned = &mut self.arrays[idx.0];
        if versioned.top_serial() != serial {
            versioned.push_version(serial);
            self.touch(Touched::Array(idx));
        }
    }

    /// Dictionary counterpart of `prep_array_for_change`
    pub fn prep_dict_for_change(&mut self, idx: DictIndex) {
        let serial = self.current_serial();
        let versioned = &mut self.dicts[idx.0];
        if versioned.top_serial() != serial {
            versioned.push_version(serial);
            self.touch(Touched::Dict(idx));
        }
    }

    fn touch(&mut self, touched: Touched) {
        let top = *self.sstack.last().unwrap();
        self.saves[top.0].touched.push(touched);
    }

    // Rollback

    /// Pop save points up to and including `target`, discarding the top
    /// version of every composite each popped save point shadowed. The
    /// caller has already validated `target` and pre-checked the operand
    /// and dictionary stacks
    pub fn rollback_to(&mut self, target: SaveIndex) {
        loop {
            let idx = self.sstack.pop().expect("rollback past the bottom save");
            let record = &mut self.saves[idx.0];
            record.valid = false;
            let serial = record.serial;
            let touched = std::mem::take(&mut record.touched);
            log::debug!(
                "restore: dropping save serial {} ({} touched composites)",
                serial,
                touched.len()
            );
            for t in touched {
                match t {
                    Touched::Array(a) => {
                        let versioned = &mut self.arrays[a.0];
                        if versioned.top_serial() == serial {
                            versioned.pop_version();
                        }
                    }
                    Touched::Dict(d) => {
                        let versioned = &mut self.dicts[d.0];
                        if versioned.top_serial() == serial {
                            versioned.pop_version();
                        }
                    }
                }
            }
            if idx == target {
                break;
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::object::Value;

    #[test]
    fn arrays_copy_on_first_write_under_a_new_save() {
        let mut vm = Vm::new();
        let arr = vm.new_array(vec![Object::from(1), Object::from(2)]);

        // No save point between allocation and mutation: write in place.
        vm.prep_array_for_change(arr.idx);
        assert_eq!(vm.array_version_depth(arr.idx), 1);

        let save = vm.new_save();
        vm.prep_array_for_change(arr.idx);
        vm.array_slice_mut(arr)[0] = Object::from(99);
        assert_eq!(vm.array_version_depth(arr.idx), 2);

        // A second mutation under the same save point reuses the copy.
        vm.prep_array_for_change(arr.idx);
        assert_eq!(vm.array_version_depth(arr.idx), 2);

        vm.rollback_to(save);
        assert_eq!(vm.array_version_depth(arr.idx), 1);
        assert_eq!(vm.array_slice(arr)[0].value, Value::Integer(1));
        assert!(!vm.save_record(save).valid);
    }

    #[test]
    fn rollback_pops_intervening_saves() {
        let mut vm = Vm::new();
        let arr = vm.new_array(vec![Object::from(0)]);

        let outer = vm.new_save();
        vm.prep_array_for_change(arr.idx);
        vm.array_slice_mut(arr)[0] = Object::from(1);

        let inner = vm.new_save();
        vm.prep_array_for_change(arr.idx);
        vm.array_slice_mut(arr)[0] = Object::from(2);

        vm.rollback_to(outer);
        assert_eq!(vm.array_slice(arr)[0].value, Value::Integer(0));
        assert!(!vm.save_record(inner).valid);
        assert!(!vm.save_record(outer).valid);

        // Every remaining version predates the restored save point.
        assert!(vm.array_birth_serial(arr.idx) < vm.save_record(outer).serial);
    }

    #[test]
    fn birth_serial_identifies_post_save_composites() {
        let mut vm = Vm::new();
        let old = vm.new_array(vec![]);
        let save = vm.new_save();
        let young = vm.new_dict(4);

        let serial = vm.save_record(save).serial;
        assert!(vm.array_birth_serial(old.idx) < serial);
        assert!(vm.dict_birth_serial(young) >= serial);
    }

    #[test]
    fn strings_are_not_versioned() {
        let mut vm = Vm::new();
        let s = vm.new_string(b"abc".to_vec());
        let save = vm.new_save();
        vm.str_bytes_mut(s)[0] = b'x';
        vm.rollback_to(save);
        assert_eq!(vm.str_bytes(s), b"xbc");
    }

    #[test]
    fn handles_stay_valid_as_the_slabs_grow() {
        let mut vm = Vm::new();
        let first = vm.new_array(vec![Object::from(7)]);
        for i in 0..100 {
            vm.new_array(vec![Object::from(i)]);
            vm.new_string(vec![0; 4]);
        }
        assert_eq!(vm.array_slice(first)[0].value, Value::Integer(7));
    }
}
