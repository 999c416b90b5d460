/// Primitive number types at least 4 bytes aligned.
///
/// Receive buffers are made of these so a frame can be reinterpreted as `f32`s in place.
pub trait Align4: bytemuck::Pod {}

impl Align4 for u32 {}
impl Align4 for i32 {}
impl Align4 for u64 {}
impl Align4 for i64 {}
impl Align4 for f32 {}
impl Align4 for f64 {}
