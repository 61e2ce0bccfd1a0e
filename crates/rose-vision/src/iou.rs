use crate::BBox;

pub fn iou(a: &BBox, b: &BBox) -> f32 {
    let ix_a = a.x.max(b.x);
    let iy_a = a.y.max(b.y);
    let ix_b = (a.x + a.w).min(b.x + b.w);
    let iy_b = (a.y + a.h).min(b.y + b.h);

    let iw = (ix_b - ix_a).max(0.0);
    let ih = (iy_b - iy_a).max(0.0);
    let inter = iw * ih;
    let union = a.area() + b.area() - inter;
    if union <= 0.0 { 0.0 } else { inter / union }
}
