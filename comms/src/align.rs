/// Element types a receive buffer can be made of.
///
/// At least 4 bytes aligned, so the `f32` arrays inside a batch can be viewed
/// in place.
pub trait Align4: bytemuck::Pod {}

macro_rules! impl_align4 {
    ($($ty:ty),*) => {
        $(impl Align4 for $ty {})*
    };
}

impl_align4!(u32, i32, u64, i64, f32, f64);
