//! Arena heap and tri-color mark-sweep collector.
//!
//! Objects live in a slab of stable slots addressed by [`ObjId`];
//! back-references (iterators over arrays, mutually capturing closures)
//! stay acyclic in Rust terms because they are ids, not pointers. All
//! allocation funnels through [`Heap::alloc`], which tracks the bytes
//! outstanding and flags a pending collection when the trigger
//! threshold is crossed; the interpreter honors the flag at the next
//! safe point.

use crate::consts::{GC_GROWTH_FACTOR, GC_INITIAL_THRESHOLD, HEAP_LIMIT};
use crate::error::Fatal;
use crate::value::{str_hash, ObjId, ObjectBody, Value};

use itertools::Itertools;

use std::collections::HashMap;

struct Slot {
    marked: bool,
    body: ObjectBody,
    size: usize,
}

/// The object heap of one VM instance.
pub struct Heap {
    slots: Vec<Option<Slot>>,
    free: Vec<ObjId>,
    bytes_allocated: usize,
    next_gc: usize,
    initial_threshold: usize,
    limit: usize,
    pause_depth: usize,
    pending: bool,
    collecting: bool,
    temp_roots: Vec<ObjId>,
    interned: HashMap<u64, Vec<ObjId>>,
    collections: u64,
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("live", &self.live_count())
            .field("bytes_allocated", &self.bytes_allocated)
            .field("next_gc", &self.next_gc)
            .field("pause_depth", &self.pause_depth)
            .finish()
    }
}

impl Heap {
    /// Heap with the given trigger threshold and hard ceiling.
    pub fn new(initial_threshold: usize, limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            bytes_allocated: 0,
            next_gc: initial_threshold,
            initial_threshold,
            limit,
            pause_depth: 0,
            pending: false,
            collecting: false,
            temp_roots: Vec::new(),
            interned: HashMap::new(),
            collections: 0,
        }
    }

    /// Heap with default parameters, for unit tests.
    pub fn for_tests() -> Self {
        Self::new(GC_INITIAL_THRESHOLD, HEAP_LIMIT)
    }

    /// Allocates an object, linking it into the live set.
    ///
    /// Crossing the trigger threshold requests a collection; the
    /// request is served at the next instruction boundary, never here,
    /// so a handler may allocate while holding ids it has not yet
    /// rooted in a register.
    pub fn alloc(&mut self, body: ObjectBody) -> Result<ObjId, Fatal> {
        let size = body.heap_size();

        if self.bytes_allocated.saturating_add(size) > self.limit {
            return Err(Fatal::OutOfMemory { limit: self.limit });
        }

        self.bytes_allocated += size;

        if self.bytes_allocated > self.next_gc {
            self.pending = true;
        }

        let slot = Some(Slot {
            marked: false,
            body,
            size,
        });

        let id = match self.free.pop() {
            Some(id) => {
                self.slots[id as usize] = slot;
                id
            }
            None => {
                self.slots.push(slot);
                (self.slots.len() - 1) as ObjId
            }
        };

        Ok(id)
    }

    /// Allocates a string object with its hash cached.
    pub fn alloc_string(&mut self, text: impl Into<String>) -> Result<ObjId, Fatal> {
        let text = text.into();
        let hash = str_hash(&text);

        self.alloc(ObjectBody::Str {
            bytes: text.into(),
            hash,
        })
    }

    /// Returns the interned object for `text`, allocating on first use.
    /// Interned strings are part of the root set.
    pub fn intern(&mut self, text: &str) -> Result<ObjId, Fatal> {
        let hash = str_hash(text);

        if let Some(candidates) = self.interned.get(&hash) {
            for &id in candidates {
                if let ObjectBody::Str { bytes, .. } = self.body(id) {
                    if &**bytes == text {
                        return Ok(id);
                    }
                }
            }
        }

        let id = self.alloc_string(text)?;
        self.interned.entry(hash).or_default().push(id);

        Ok(id)
    }

    /// Body of a live object.
    ///
    /// Ids held by the interpreter are rooted, so a slot can only be
    /// vacated after its last holder dropped it.
    pub fn body(&self, id: ObjId) -> &ObjectBody {
        &self.slots[id as usize]
            .as_ref()
            .expect("object id resolved after its slot was swept")
            .body
    }

    /// Mutable body of a live object.
    pub fn body_mut(&mut self, id: ObjId) -> &mut ObjectBody {
        &mut self.slots[id as usize]
            .as_mut()
            .expect("object id resolved after its slot was swept")
            .body
    }

    /// Diagnostic kind name of a value, resolving heap references.
    pub fn type_name(&self, value: Value) -> &'static str {
        match value {
            Value::Obj(id) => self.body(id).type_name(),
            other => other.tag_name(),
        }
    }

    /* TEMPORARY ROOTS */

    /// Protects an object across a multi-step handler operation.
    pub fn push_root(&mut self, id: ObjId) {
        self.temp_roots.push(id);
    }

    /// Releases the most recent temporary root.
    pub fn pop_root(&mut self) {
        self.temp_roots.pop();
    }

    /* PAUSE / RESUME */

    /// Increments the pause counter; collections are skipped while it
    /// is positive, though the trigger still records them as pending.
    pub fn pause(&mut self) {
        self.pause_depth += 1;
    }

    /// Decrements the pause counter.
    pub fn resume(&mut self) {
        self.pause_depth = self.pause_depth.saturating_sub(1);
    }

    /// Whether a collection should run at the next safe point.
    pub fn should_collect(&self) -> bool {
        self.pending && self.pause_depth == 0
    }

    /* COLLECTION */

    /// Runs a full mark-sweep cycle from the given external roots plus
    /// the heap's own roots (temporaries, interned strings).
    pub fn collect<I>(&mut self, roots: I) -> Result<(), Fatal>
    where
        I: IntoIterator<Item = Value>,
    {
        if self.collecting {
            return Err(Fatal::ReentrantGc);
        }

        self.collecting = true;
        let before = self.bytes_allocated;

        let mut gray: Vec<ObjId> = Vec::new();

        for value in roots {
            if let Value::Obj(id) = value {
                self.mark(id, &mut gray);
            }
        }

        let temp: Vec<ObjId> = self.temp_roots.clone();
        for id in temp {
            self.mark(id, &mut gray);
        }

        let interned: Vec<ObjId> = self.interned.values().flatten().copied().collect();
        for id in interned {
            self.mark(id, &mut gray);
        }

        while let Some(id) = gray.pop() {
            self.blacken(id, &mut gray);
        }

        self.sweep();

        self.next_gc = (self.bytes_allocated * GC_GROWTH_FACTOR).max(self.initial_threshold);
        self.pending = false;
        self.collecting = false;
        self.collections += 1;

        tracing::debug!(
            before,
            after = self.bytes_allocated,
            next_gc = self.next_gc,
            "collection finished"
        );

        Ok(())
    }

    fn mark(&mut self, id: ObjId, gray: &mut Vec<ObjId>) {
        if let Some(slot) = self.slots[id as usize].as_mut() {
            if !slot.marked {
                slot.marked = true;
                gray.push(id);
            }
        }
    }

    fn blacken(&mut self, id: ObjId, gray: &mut Vec<ObjId>) {
        let children: Vec<ObjId> = match self.body(id) {
            ObjectBody::Str { .. } | ObjectBody::Error { .. } | ObjectBody::Range { .. } => {
                Vec::new()
            }
            ObjectBody::ArrayIter { array, .. } => vec![*array],
            ObjectBody::Array(items) | ObjectBody::Struct(items) => {
                items.iter().filter_map(obj_id).collect()
            }
            ObjectBody::Enum { payload, .. } => payload.iter().filter_map(obj_id).collect(),
            ObjectBody::Closure { upvalues, .. } => upvalues.iter().filter_map(obj_id).collect(),
        };

        for child in children {
            self.mark(child, gray);
        }
    }

    fn sweep(&mut self) {
        for (index, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                Some(object) if object.marked => object.marked = false,
                Some(object) => {
                    self.bytes_allocated -= object.size;
                    *slot = None;
                    self.free.push(index as ObjId);
                }
                None => {}
            }
        }
    }

    /* ACCOUNTING */

    /// Live object count.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    /// Bytes currently accounted to live objects.
    pub const fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Completed collection cycles.
    pub const fn collections(&self) -> u64 {
        self.collections
    }

    /// Whether the byte counter agrees with the live object list, and
    /// no mark bit survived the last sweep.
    pub fn accounting_consistent(&self) -> bool {
        let recounted: usize = self
            .slots
            .iter()
            .flatten()
            .map(|slot| slot.size)
            .sum();

        recounted == self.bytes_allocated && self.slots.iter().flatten().all(|slot| !slot.marked)
    }

    /* STRUCTURAL OPERATIONS */

    /// Structural equality between two heap objects; closures and
    /// iterators compare by identity.
    pub fn objects_eq(&self, a: ObjId, b: ObjId) -> bool {
        if a == b {
            return true;
        }

        let mut visited = Vec::new();
        self.objects_eq_inner(a, b, &mut visited)
    }

    fn objects_eq_inner(&self, a: ObjId, b: ObjId, visited: &mut Vec<(ObjId, ObjId)>) -> bool {
        if a == b {
            return true;
        }

        // A revisited pair means a reference cycle; treat the cycle as
        // consistent and let the remaining structure decide.
        if visited.contains(&(a, b)) {
            return true;
        }
        visited.push((a, b));

        match (self.body(a), self.body(b)) {
            (
                ObjectBody::Str {
                    bytes: x, hash: hx, ..
                },
                ObjectBody::Str {
                    bytes: y, hash: hy, ..
                },
            ) => hx == hy && x.as_bytes() == y.as_bytes(),
            (ObjectBody::Array(x), ObjectBody::Array(y)) => self.values_eq_all(x, y, visited),
            (ObjectBody::Struct(x), ObjectBody::Struct(y)) => self.values_eq_all(x, y, visited),
            (
                ObjectBody::Enum {
                    variant: vx,
                    payload: px,
                },
                ObjectBody::Enum {
                    variant: vy,
                    payload: py,
                },
            ) => vx == vy && self.values_eq_all(px, py, visited),
            (
                ObjectBody::Range {
                    current: cx,
                    end: ex,
                },
                ObjectBody::Range {
                    current: cy,
                    end: ey,
                },
            ) => cx == cy && ex == ey,
            (
                ObjectBody::Error {
                    kind: kx,
                    message: mx,
                    ..
                },
                ObjectBody::Error {
                    kind: ky,
                    message: my,
                    ..
                },
            ) => kx == ky && mx == my,
            // Closures and iterators are opaque: identity only, and
            // `a == b` was ruled out above.
            _ => false,
        }
    }

    fn values_eq_all(&self, xs: &[Value], ys: &[Value], visited: &mut Vec<(ObjId, ObjId)>) -> bool {
        xs.len() == ys.len()
            && xs.iter().zip(ys).all(|(x, y)| match (x, y) {
                (Value::Obj(ix), Value::Obj(iy)) => self.objects_eq_inner(*ix, *iy, visited),
                _ => Value::deep_eq(*x, *y, self),
            })
    }

    /// Canonical string form of any value: decimal for numbers,
    /// `true`/`false`, `nil`, string payloads verbatim, bracketed
    /// element-wise arrays.
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::I32(v) => v.to_string(),
            Value::I64(v) => v.to_string(),
            Value::U32(v) => v.to_string(),
            Value::U64(v) => v.to_string(),
            Value::F64(v) => v.to_string(),
            Value::Obj(id) => self.format_object(id),
        }
    }

    fn format_object(&self, id: ObjId) -> String {
        match self.body(id) {
            ObjectBody::Str { bytes, .. } => bytes.to_string(),
            ObjectBody::Array(items) => {
                let elements = items.iter().map(|item| self.format_value(*item)).join(", ");
                format!("[{elements}]")
            }
            ObjectBody::Error { kind, message, .. } => format!("{kind}: {message}"),
            ObjectBody::Range { current, end } => format!("{current}..{end}"),
            ObjectBody::ArrayIter { .. } => "<iterator>".to_string(),
            ObjectBody::Closure { proto, .. } => format!("<fn {}>", proto.name),
            ObjectBody::Struct(fields) => {
                let elements = fields.iter().map(|field| self.format_value(*field)).join(", ");
                format!("{{{elements}}}")
            }
            ObjectBody::Enum { variant, payload } => {
                if payload.is_empty() {
                    format!("#{variant}")
                } else {
                    let elements = payload.iter().map(|item| self.format_value(*item)).join(", ");
                    format!("#{variant}({elements})")
                }
            }
        }
    }
}

fn obj_id(value: &Value) -> Option<ObjId> {
    match value {
        Value::Obj(id) => Some(*id),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sweep_reclaims_unreachable_objects() {
        let mut heap = Heap::for_tests();

        let keep = heap.alloc_string("keep").unwrap();
        let drop = heap.alloc_string("drop").unwrap();

        assert_eq!(heap.live_count(), 2);

        heap.collect([Value::Obj(keep)]).unwrap();

        assert_eq!(heap.live_count(), 1);
        assert!(matches!(heap.body(keep), ObjectBody::Str { .. }));
        assert!(heap.accounting_consistent());

        // The freed slot is reused before the slab grows.
        let reused = heap.alloc_string("again").unwrap();
        assert_eq!(reused, drop);
    }

    #[test]
    fn arrays_keep_their_elements_alive() {
        let mut heap = Heap::for_tests();

        let element = heap.alloc_string("element").unwrap();
        let array = heap.alloc(ObjectBody::Array(vec![Value::Obj(element)])).unwrap();

        heap.collect([Value::Obj(array)]).unwrap();

        assert_eq!(heap.live_count(), 2);
        assert!(heap.accounting_consistent());
    }

    #[test]
    fn temp_roots_survive_collections() {
        let mut heap = Heap::for_tests();

        let id = heap.alloc_string("pinned").unwrap();
        heap.push_root(id);

        heap.collect([]).unwrap();
        assert_eq!(heap.live_count(), 1);

        heap.pop_root();
        heap.collect([]).unwrap();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn interned_strings_are_deduplicated_and_rooted() {
        let mut heap = Heap::for_tests();

        let a = heap.intern("shared").unwrap();
        let b = heap.intern("shared").unwrap();
        assert_eq!(a, b);

        heap.collect([]).unwrap();
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    fn pause_defers_but_records_the_trigger() {
        let mut heap = Heap::new(1, HEAP_LIMIT);

        heap.pause();
        heap.alloc_string("over the threshold").unwrap();

        assert!(!heap.should_collect());

        heap.resume();
        assert!(heap.should_collect());
    }

    #[test]
    fn structural_equality_spans_nested_objects() {
        let mut heap = Heap::for_tests();

        let s1 = heap.alloc_string("x").unwrap();
        let s2 = heap.alloc_string("x").unwrap();
        let a1 = heap
            .alloc(ObjectBody::Array(vec![Value::Obj(s1), Value::I32(1)]))
            .unwrap();
        let a2 = heap
            .alloc(ObjectBody::Array(vec![Value::Obj(s2), Value::I32(1)]))
            .unwrap();

        assert!(heap.objects_eq(a1, a2));
    }

    #[test]
    fn allocation_past_the_ceiling_is_out_of_memory() {
        let mut heap = Heap::new(GC_INITIAL_THRESHOLD, 64);

        let err = heap.alloc_string("x".repeat(1024)).unwrap_err();
        assert!(matches!(err, Fatal::OutOfMemory { limit: 64 }));
    }
}
