use serde::{Deserialize, Serialize};

/// Prototype-mask decoding parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskDecodeParams {
    /// Probability cut after the sigmoid; lower values are zeroed.
    pub threshold: f32,
    /// Side of the square detector input the boxes are expressed in.
    pub input_size: f32,
}

impl Default for MaskDecodeParams {
    fn default() -> Self {
        Self {
            threshold: 0.5,
            input_size: 640.0,
        }
    }
}

/// Polygon refinement parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefinerParams {
    /// ROI padding around the detection box, relative to the box size.
    pub roi_margin_rel: f32,
    /// Minimum ROI padding in frame pixels.
    pub roi_margin_px: usize,
    /// Half-width of the band re-labelled by the mask refinement step.
    pub mask_band_px: usize,
    /// Skip mask refinement when foreground/background means differ by less.
    pub mask_min_contrast: f32,
    /// Auto-threshold spread around the median gradient magnitude.
    pub canny_sigma: f32,
    /// Floor for both hysteresis thresholds (Sobel magnitude units).
    pub min_edge_magnitude: f32,
    /// Half-width of the band around the mask boundary where edges are kept.
    pub edge_band_px: usize,
    /// Hough angle resolution in degrees.
    pub hough_theta_res_deg: f64,
    /// Hough offset resolution in pixels.
    pub hough_rho_res_px: f64,
    /// Each edge pixel votes within this angle of its gradient normal.
    pub hough_vote_window_deg: f64,
    /// Peaks below this fraction of the strongest peak are ignored.
    pub hough_min_peak_frac: f64,
    /// Upper bound on extracted Hough peaks.
    pub hough_max_peaks: usize,
    /// Minimum edge pixels supporting a segment.
    pub min_segment_support: usize,
    /// Segments closer than this in orientation may merge.
    pub cluster_angle_tol_deg: f64,
    /// Segments closer than this in offset (relative to ROI diagonal) may merge.
    pub cluster_offset_tol_rel: f64,
    /// Max orientation mismatch between a cluster and a coarse polygon edge.
    pub match_angle_tol_deg: f64,
    /// Max distance between a cluster line and a coarse edge midpoint, relative to ROI diagonal.
    pub match_offset_tol_rel: f64,
    /// Edge pixels within this distance of a line take part in its refit.
    pub refit_band_px: f64,
    /// Intersections moving farther than this from the coarse vertex are rejected.
    pub max_corner_shift_rel: f64,
}

impl Default for RefinerParams {
    fn default() -> Self {
        Self {
            roi_margin_rel: 0.15,
            roi_margin_px: 6,
            mask_band_px: 3,
            mask_min_contrast: 12.0,
            canny_sigma: 0.33,
            min_edge_magnitude: 40.0,
            edge_band_px: 6,
            hough_theta_res_deg: 1.0,
            hough_rho_res_px: 1.0,
            hough_vote_window_deg: 4.0,
            hough_min_peak_frac: 0.15,
            hough_max_peaks: 16,
            min_segment_support: 8,
            cluster_angle_tol_deg: 5.0,
            cluster_offset_tol_rel: 0.03,
            match_angle_tol_deg: 15.0,
            match_offset_tol_rel: 0.12,
            refit_band_px: 2.0,
            max_corner_shift_rel: 0.15,
        }
    }
}
