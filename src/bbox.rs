use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

/// All boxes in this crate live in normalized image coordinates: both axes
/// span [0, 1], y grows downward.
pub trait BBoxFormat: std::fmt::Debug + Copy + PartialEq {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(bound = "")]
pub struct BBox<F: BBoxFormat>([f32; 4], PhantomData<F>);

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        BBox([left, top, right, bottom], PhantomData)
    }

    /// Box of the given size centered on `center`.
    #[inline]
    pub fn around(center: na::Point2<f32>, width: f32, height: f32) -> Self {
        let (w2, h2) = (width * 0.5, height * 0.5);

        Self::ltrb(center.x - w2, center.y - h2, center.x + w2, center.y + h2)
    }

    /// Tight box around a set of points, `None` for an empty set.
    pub fn enclosing<I: IntoIterator<Item = na::Point2<f32>>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let init = [first.x, first.y, first.x, first.y];

        let [l, t, r, b] = iter.fold(init, |[l, t, r, b], p| {
            [l.min(p.x), t.min(p.y), r.max(p.x), b.max(p.y)]
        });

        Some(Self::ltrb(l, t, r, b))
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.0[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.0[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.0[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.0[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.0[2] - self.0[0]
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.0[3] - self.0[1]
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.0[0] + self.0[2]) * 0.5,
            (self.0[1] + self.0[3]) * 0.5,
        )
    }

    #[inline]
    pub fn contains(&self, p: &na::Point2<f32>) -> bool {
        p.x >= self.left() && p.x <= self.right() && p.y >= self.top() && p.y <= self.bottom()
    }

    #[inline]
    pub fn translate(&self, offset: na::Vector2<f32>) -> Self {
        Self::ltrb(
            self.0[0] + offset.x,
            self.0[1] + offset.y,
            self.0[2] + offset.x,
            self.0[3] + offset.y,
        )
    }

    /// Clips the box to the unit square.
    #[inline]
    pub fn clamp_unit(&self) -> Self {
        Self::ltrb(
            self.0[0].clamp(0.0, 1.0),
            self.0[1].clamp(0.0, 1.0),
            self.0[2].clamp(0.0, 1.0),
            self.0[3].clamp(0.0, 1.0),
        )
    }

    pub fn iou(&self, other: &Self) -> f32 {
        let i_l = self.left().max(other.left());
        let i_t = self.top().max(other.top());
        let i_r = self.right().min(other.right());
        let i_b = self.bottom().min(other.bottom());
        let i_area = (i_r - i_l).max(0.0) * (i_b - i_t).max(0.0);

        let union = self.area() + other.area() - i_area;
        if union <= f32::EPSILON {
            return 0.0;
        }

        i_area / union
    }
}
