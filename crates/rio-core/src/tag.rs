//! Packing scheme for io_uring's `user_data` field.
//!
//! Every SQE submitted by this runtime carries a pointer (or small integer)
//! plus a 3-bit discriminant in its 64-bit `user_data`. This is the only
//! place in the crate that does raw pointer-to-integer arithmetic; every
//! other module goes through `UserData::pack`/`unpack`.

const TAG_BITS: u32 = 3;
const TAG_MASK: u64 = (1 << TAG_BITS) - 1;

/// What kind of completion a tagged `user_data` value refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Tag {
    /// Payload is a pointer to a `TaskInfo`; write the result and wake its waker.
    TaskInfoPtr = 0,
    /// Payload is a `TaskId`; reschedule it directly, no result slot involved.
    TaskHandle = 1,
    /// Payload is a pointer to a `TaskInfo` belonging to a non-terminal link
    /// member; write the result but do not wake anything.
    TaskInfoPtrLinkSqe = 2,
    /// Payload is a `TaskId` delivered by a peer worker via `IORING_OP_MSG_RING`.
    MsgRing = 3,
    /// Internal sentinel: the co-spawn eventfd fired, drain the inbox FIFO.
    EventfdWake = 4,
    /// Internal sentinel: a completion the worker intentionally ignores
    /// (detached ops rewritten to a nop, or a cancel's own acknowledgement).
    Ignored = 5,
}

impl Tag {
    const fn from_bits(bits: u64) -> Option<Tag> {
        match bits {
            0 => Some(Tag::TaskInfoPtr),
            1 => Some(Tag::TaskHandle),
            2 => Some(Tag::TaskInfoPtrLinkSqe),
            3 => Some(Tag::MsgRing),
            4 => Some(Tag::EventfdWake),
            5 => Some(Tag::Ignored),
            _ => None,
        }
    }
}

/// A packed `{ payload: u61, tag: Tag }` pair stored verbatim in an SQE's
/// `user_data` and read back out of the matching CQE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct UserData(u64);

impl UserData {
    /// Values below this are never a valid heap pointer on a Linux userspace
    /// mapping (the low page is unmapped), so they double as tag-only
    /// sentinels that never collide with a `TaskInfoPtr`/`TaskHandle` payload.
    pub const RESERVED_MAX: u64 = 0x1000;

    pub fn pack(payload: u64, tag: Tag) -> Self {
        debug_assert_eq!(payload & TAG_MASK, 0, "payload must be tag-aligned");
        UserData(payload | tag as u64)
    }

    pub fn pack_ptr<T>(ptr: *const T, tag: Tag) -> Self {
        Self::pack(ptr as u64 & !TAG_MASK, tag)
    }

    pub const fn sentinel(tag: Tag) -> Self {
        UserData(tag as u64)
    }

    pub fn raw(self) -> u64 {
        self.0
    }

    pub fn from_raw(raw: u64) -> Self {
        UserData(raw)
    }

    pub fn tag(self) -> Tag {
        Tag::from_bits(self.0 & TAG_MASK).expect("corrupt user_data tag")
    }

    pub fn payload(self) -> u64 {
        self.0 & !TAG_MASK
    }

    /// # Safety
    /// Caller must ensure the payload was packed from a valid `*const T` via
    /// `pack_ptr` and that `T` is still alive.
    pub unsafe fn payload_ptr<T>(self) -> *const T {
        self.payload() as *const T
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_ptr() {
        let x = 42u32;
        let ptr = &x as *const u32;
        let packed = UserData::pack_ptr(ptr, Tag::TaskInfoPtr);
        assert_eq!(packed.tag(), Tag::TaskInfoPtr);
        assert_eq!(unsafe { packed.payload_ptr::<u32>() }, ptr);
    }

    #[test]
    fn sentinel_roundtrip() {
        let s = UserData::sentinel(Tag::EventfdWake);
        assert_eq!(s.tag(), Tag::EventfdWake);
        assert_eq!(s.raw(), Tag::EventfdWake as u64);
        assert!(s.raw() < UserData::RESERVED_MAX);
    }

    #[test]
    fn distinct_tags_distinct_bits() {
        let a = UserData::pack(0x1000, Tag::TaskInfoPtr);
        let b = UserData::pack(0x1000, Tag::TaskHandle);
        assert_ne!(a.raw(), b.raw());
        assert_eq!(a.payload(), b.payload());
    }
}
