use crate::error::{MixRampError, Result};
use crate::veprintln;

// ─── ReplayGain 1.0 constants ────────────────────────────────────────────────

const YULE_ORDER: usize = 10;
const BUTTER_ORDER: usize = 2;
const MAX_ORDER: usize = if YULE_ORDER > BUTTER_ORDER { YULE_ORDER } else { BUTTER_ORDER };

/// RMS 窗口长度（秒）
const RMS_WINDOW_TIME: f64 = 0.050;
const MAX_SAMP_FREQ: usize = 96_000;
const MAX_SAMPLES_PER_WINDOW: usize = MAX_SAMP_FREQ / 20 + 1;

const STEPS_PER_DB: f64 = 100.0;
/// 直方图覆盖 0..120 dB，步长 0.01 dB
const HISTOGRAM_LEN: usize = 12_000;
const RMS_PERCENTILE: f64 = 0.95;

/// -14 dBFS 粉红噪声参考信号经本算法得到的响度，对应 89 dB SPL
pub const PINK_REF: f64 = 64.82;

// ─── Equal-loudness filter coefficients ──────────────────────────────────────

/// 按采样率列出的等响滤波器系数
///
/// `yule` 与 `butter` 均为交错排列 `[b0, a1, b1, a2, b2, ...]`，
/// 与滤波器内核的取值顺序一致。
struct FilterCoeffs {
    rate: u32,
    yule: [f64; 2 * YULE_ORDER + 1],
    butter: [f64; 2 * BUTTER_ORDER + 1],
}

#[rustfmt::skip]
static FILTER_TABLE: [FilterCoeffs; 12] = [
    FilterCoeffs {
        rate: 96000,
        yule: [
            0.006471345933032, -7.22103125152679, -0.02567678242161,
            24.7034187975904, 0.049805860704367, -52.6825833623896,
            -0.05823001743528, 77.4825736677539, 0.040611847441914,
            -82.0074753444205, -0.010912036887501, 63.1566097101925,
            -0.00901635868667, -34.889569769245, 0.012448886238123,
            13.2126852760198, -0.007206683749426, -3.09445623301669,
            0.002167156433951, 0.340344741393305, -0.000261819276949,
        ],
        butter: [
            0.99308203517541, -1.98611621154089, -1.98616407035082,
            0.986211929160751, 0.99308203517541,
        ],
    },
    FilterCoeffs {
        rate: 88200,
        yule: [
            0.015415414474287, -7.19001570087017, -0.07691359399407,
            24.4109412087159, 0.196677418516518, -51.6306373580801,
            -0.338855114128061, 75.3978476863163, 0.430094579594561,
            -79.4164552507386, -0.415015413747894, 61.0373661948115,
            0.304942508151101, -33.7446462547014, -0.166191795926663,
            12.8168791146274, 0.063198189938739, -3.01332198541437,
            -0.015003978694525, 0.223619893831468, 0.001748085184539,
        ],
        butter: [
            0.992472550461293, -1.98488843762334, -1.98494510092258,
            0.979389350028798, 0.992472550461293,
        ],
    },
    FilterCoeffs {
        rate: 64000,
        yule: [
            0.021776466467053, -5.74819833657784, -0.062376961003801,
            16.246507961894, 0.107731165328514, -29.9691822642542,
            -0.150994515142316, 40.027597579378, 0.170334807313632,
            -40.3209196052655, -0.157984942890531, 30.8542077487718,
            0.121639833268721, -17.5965138737281, -0.074094040816409,
            7.10690214103873, 0.031282852041061, -1.82175564515191,
            -0.00755421235941, 0.223619893831468, 0.00117925454213,
        ],
        butter: [
            0.989641019334721, -1.97917472731008, -1.97928203866944,
            0.979389350028798, 0.989641019334721,
        ],
    },
    FilterCoeffs {
        rate: 48000,
        yule: [
            0.03857599435200, -3.84664617118067, -0.02160367184185,
            7.81501653005538, -0.00123395316851, -11.34170355132042,
            -0.00009291677959, 13.05504219327545, -0.01655260341619,
            -12.28759895145294, 0.02161526843274, 9.48293806319790,
            -0.02074045215285, -5.87257861775999, 0.00594298065125,
            2.75465861874613, 0.00306428023191, -0.86984376593551,
            0.00012025322027, 0.13919314567432, 0.00288463683916,
        ],
        butter: [
            0.98621192462708, -1.97223372919527, -1.97242384925416,
            0.97261396931306, 0.98621192462708,
        ],
    },
    FilterCoeffs {
        rate: 44100,
        yule: [
            0.05418656406430, -3.47845948550071, -0.02911007808948,
            6.36317777566148, -0.00848709379851, -8.54751527471874,
            -0.00851165645469, 9.47693607801280, -0.00834990904936,
            -8.81498681370155, 0.02245293253339, 6.85401540936998,
            -0.02596338512915, -4.39470996079559, 0.01624864962975,
            2.19611684890774, -0.00240879051584, -0.75104302451432,
            0.00674613682247, 0.13149317958808, -0.00187763777362,
        ],
        butter: [
            0.98500175787242, -1.96977855582618, -1.97000351574484,
            0.97022847566350, 0.98500175787242,
        ],
    },
    FilterCoeffs {
        rate: 32000,
        yule: [
            0.15457299681924, -2.37898834973084, -0.09331049056315,
            2.84868151156327, -0.06247880153653, -2.64577170229825,
            0.02163541888798, 2.23697657451713, -0.05588393329856,
            -1.67148153367602, 0.04781476674921, 1.00595954808547,
            0.00222312597743, -0.45953458054983, 0.03174092540049,
            0.16378164858596, -0.01390589421898, -0.05032077717131,
            0.00651420667831, 0.02347897407020, -0.00881362733839,
        ],
        butter: [
            0.97938932735214, -1.95835380975398, -1.95877865470428,
            0.95920349965459, 0.97938932735214,
        ],
    },
    FilterCoeffs {
        rate: 24000,
        yule: [
            0.30296907319327, -1.61273165137247, -0.22613988682123,
            1.07977492259970, -0.08587323730772, -0.25656257754070,
            0.03282930172664, -0.16276719120440, -0.00915702933434,
            -0.22638893773906, -0.02364141202522, 0.39120800788284,
            -0.00584456039913, -0.22138138954925, 0.06276101321749,
            0.04500235387352, -0.00000828086748, 0.02005851806501,
            0.00205861885564, 0.00302439095741, -0.02950134983287,
        ],
        butter: [
            0.97531843204928, -1.95002759149878, -1.95063686409857,
            0.95124613669835, 0.97531843204928,
        ],
    },
    FilterCoeffs {
        rate: 22050,
        yule: [
            0.33642304856132, -1.49858979367799, -0.25572241425570,
            0.87350271418188, -0.11828570177555, 0.12205022308084,
            0.11921148675203, -0.80774944671438, -0.07834489609479,
            0.47854794562326, -0.00469977914380, -0.12453458140019,
            -0.00589500224440, -0.04067510197014, 0.05724228140351,
            0.08333755284107, 0.00832043980773, -0.04237348025746,
            -0.01635381384540, 0.02977207319925, -0.01760176568150,
        ],
        butter: [
            0.97316523498161, -1.94561023566527, -1.94633046996323,
            0.94705070426118, 0.97316523498161,
        ],
    },
    FilterCoeffs {
        rate: 16000,
        yule: [
            0.44915256608450, -0.62820619233671, -0.14351757464547,
            0.29661783706366, -0.22784394429749, -0.37256372942400,
            -0.01419140100551, 0.00213767857124, 0.04078262797139,
            -0.42029820170918, -0.12398163381748, 0.22199650564824,
            0.04078565135648, 0.00613424350682, 0.10478503600251,
            0.06747620744683, -0.01863887810927, 0.05784820375801,
            -0.03193428438915, 0.03222754072173, 0.00541907748707,
        ],
        butter: [
            0.96454515552826, -1.92783286977036, -1.92909031105652,
            0.93034775234268, 0.96454515552826,
        ],
    },
    FilterCoeffs {
        rate: 12000,
        yule: [
            0.56619470757641, -1.04800335126349, -0.75464456939302,
            0.29156311971249, 0.16242137742230, -0.26806001042947,
            0.16744243493672, 0.00819999645858, -0.18901604199609,
            0.45054734505008, 0.30931782841830, -0.33032403314006,
            -0.27562961986224, 0.06739368333110, 0.00647310677246,
            -0.04784254229033, 0.08647503780351, 0.01639907836189,
            -0.03788984554840, 0.01807364323573, -0.00588215443421,
        ],
        butter: [
            0.96009142950541, -1.91858953033784, -1.92018285901082,
            0.92177618768381, 0.96009142950541,
        ],
    },
    FilterCoeffs {
        rate: 11025,
        yule: [
            0.58100494960553, -0.51035327095184, -0.53174909058578,
            -0.31863563325245, -0.14289799034253, -0.20256413484477,
            0.17520704835522, 0.14728154134330, 0.02377945217615,
            0.38952639978999, 0.15558449135573, -0.23313271880868,
            -0.25344790059353, -0.05246019024463, 0.01628462406333,
            -0.02505961724053, 0.06920467763959, 0.02442357316099,
            -0.03721611395801, 0.01818801111503, -0.00749618797172,
        ],
        butter: [
            0.95856916599601, -1.91542108074780, -1.91713833199203,
            0.91885558323625, 0.95856916599601,
        ],
    },
    FilterCoeffs {
        rate: 8000,
        yule: [
            0.53648789255105, -0.25049871956020, -0.42163034350696,
            -0.43193942311114, -0.00275953611929, -0.03424681017675,
            0.04267842219415, -0.04678328784242, -0.10214864179676,
            0.26408300200955, 0.14590772289388, 0.15113130533216,
            -0.02459864859345, -0.17556493366449, -0.11202315195388,
            -0.18823009262115, -0.04060034127000, 0.05477720428674,
            0.04788665548180, 0.04704409688120, -0.02217936801134,
        ],
        butter: [
            0.94597685600279, -1.88903307939452, -1.89195371200558,
            0.89487434461664, 0.94597685600279,
        ],
    },
];

/// 支持的采样率列表（Hz）
pub fn supported_rates() -> impl Iterator<Item = u32> {
    FILTER_TABLE.iter().map(|c| c.rate)
}

// ─── Filters ─────────────────────────────────────────────────────────────────

/// 10 阶 Yule-Walker 滤波，`input[x - 10..]` 与 `output[y - 10..]` 必须是有效历史
fn filter_yule(input: &[f64], x: usize, output: &mut [f64], y: usize, n: usize, k: &[f64; 21]) {
    for s in 0..n {
        let (x, y) = (x + s, y + s);
        // 1e-10 keeps the recursion out of denormals on silence
        let mut acc = 1e-10 + input[x] * k[0];
        for j in 1..=YULE_ORDER {
            acc = acc - output[y - j] * k[2 * j - 1] + input[x - j] * k[2 * j];
        }
        output[y] = acc;
    }
}

/// 2 阶 Butterworth 高通
fn filter_butter(input: &[f64], x: usize, output: &mut [f64], y: usize, n: usize, k: &[f64; 5]) {
    for s in 0..n {
        let (x, y) = (x + s, y + s);
        let mut acc = input[x] * k[0];
        for j in 1..=BUTTER_ORDER {
            acc = acc - output[y - j] * k[2 * j - 1] + input[x - j] * k[2 * j];
        }
        output[y] = acc;
    }
}

/// 平方和：先处理不足 16 个的余数，再按 16 个一组累加
fn sum_squares(acc: &mut f64, samples: &[f64]) {
    let rem = samples.len() % 16;
    for v in &samples[..rem] {
        *acc += v * v;
    }
    for group in samples[rem..].chunks_exact(16) {
        *acc += group.iter().map(|v| v * v).sum::<f64>();
    }
}

// ─── Per-channel state ───────────────────────────────────────────────────────

/// 单声道的滤波历史
///
/// 三个缓冲区的前 `MAX_ORDER` 个元素保存上一段的尾部，
/// 当前窗口的数据从下标 `MAX_ORDER` 开始写入。
struct ChannelState {
    /// 输入历史 + 当前块的前 `MAX_ORDER` 个采样
    pre: [f64; 2 * MAX_ORDER],
    /// Yule 滤波输出
    step: Vec<f64>,
    /// Butter 滤波输出
    out: Vec<f64>,
    sum: f64,
}

impl ChannelState {
    fn new() -> Self {
        Self {
            pre: [0.0; 2 * MAX_ORDER],
            step: vec![0.0; MAX_SAMPLES_PER_WINDOW + MAX_ORDER],
            out: vec![0.0; MAX_SAMPLES_PER_WINDOW + MAX_ORDER],
            sum: 0.0,
        }
    }

    fn reset_history(&mut self) {
        self.pre[..MAX_ORDER].fill(0.0);
        self.step[..MAX_ORDER].fill(0.0);
        self.out[..MAX_ORDER].fill(0.0);
        self.sum = 0.0;
    }

    /// 当前块开始时，把块首的 `MAX_ORDER` 个采样接到输入历史之后
    fn load_block_head(&mut self, samples: &[f64]) {
        let n = samples.len().min(MAX_ORDER);
        self.pre[MAX_ORDER..MAX_ORDER + n].copy_from_slice(&samples[..n]);
    }

    /// 滤波 `samples[pos..pos + n]`，结果写到窗口偏移 `totsamp` 处并累加平方和
    fn filter(&mut self, samples: &[f64], pos: usize, n: usize, totsamp: usize, coeffs: &FilterCoeffs) {
        let at = MAX_ORDER + totsamp;
        if pos < MAX_ORDER {
            filter_yule(&self.pre, MAX_ORDER + pos, &mut self.step, at, n, &coeffs.yule);
        } else {
            filter_yule(samples, pos, &mut self.step, at, n, &coeffs.yule);
        }
        filter_butter(&self.step, at, &mut self.out, at, n, &coeffs.butter);
        sum_squares(&mut self.sum, &self.out[at..at + n]);
    }

    /// 窗口结束：保留最后 `MAX_ORDER` 个滤波输出作为下一窗口的历史
    fn shift_window(&mut self, totsamp: usize) {
        self.step.copy_within(totsamp..totsamp + MAX_ORDER, 0);
        self.out.copy_within(totsamp..totsamp + MAX_ORDER, 0);
        self.sum = 0.0;
    }

    /// 块结束：输入历史保留最近的 `MAX_ORDER` 个采样
    fn store_block_tail(&mut self, samples: &[f64]) {
        let n = samples.len();
        if n < MAX_ORDER {
            self.pre.copy_within(n..MAX_ORDER, 0);
            self.pre[MAX_ORDER - n..MAX_ORDER].copy_from_slice(samples);
        } else {
            self.pre[..MAX_ORDER].copy_from_slice(&samples[n - MAX_ORDER..]);
        }
    }
}

// ─── Gain analysis ───────────────────────────────────────────────────────────

/// ReplayGain 响度分析器
///
/// 输入采样以 16 位满幅 = 32768.0 为刻度。每次调用 [`GainAnalysis::title_gain`]
/// 返回自上次调用以来所有采样的增益，并把这一段的直方图并入整轨直方图。
pub struct GainAnalysis {
    coeffs: &'static FilterCoeffs,
    sample_window: usize,
    totsamp: usize,
    left: ChannelState,
    right: ChannelState,
    /// 当前片段的 RMS 直方图
    span: Vec<u32>,
    /// 所有已结束片段的累计直方图
    track: Vec<u32>,
    span_samples: usize,
}

impl GainAnalysis {
    pub fn new(sample_rate: f64) -> Result<Self> {
        let Some(coeffs) = FILTER_TABLE.iter().find(|c| f64::from(c.rate) == sample_rate) else {
            veprintln!("支持的采样率: {:?}", supported_rates().collect::<Vec<_>>());
            return Err(MixRampError::UnsupportedRate(sample_rate));
        };

        Ok(Self {
            coeffs,
            sample_window: (sample_rate * RMS_WINDOW_TIME).ceil() as usize,
            totsamp: 0,
            left: ChannelState::new(),
            right: ChannelState::new(),
            span: vec![0; HISTOGRAM_LEN],
            track: vec![0; HISTOGRAM_LEN],
            span_samples: 0,
        })
    }

    /// 一个片段至少需要的采样数（一个完整的 RMS 窗口）
    pub fn min_samples(&self) -> usize {
        self.sample_window
    }

    /// 送入一块采样。单声道时 `right` 为 `None`，按左右声道相同处理；
    /// 立体声时 `right` 的长度不得小于 `left`。
    pub fn analyze_samples(&mut self, left: &[f64], right: Option<&[f64]>) {
        let n = left.len();
        if n == 0 { return; }
        let right = &right.unwrap_or(left)[..n];
        self.span_samples += n;

        self.left.load_block_head(left);
        self.right.load_block_head(right);

        let mut pos = 0;
        while pos < n {
            let mut count = (n - pos).min(self.sample_window - self.totsamp);
            if pos < MAX_ORDER {
                count = count.min(MAX_ORDER - pos);
            }

            self.left.filter(left, pos, count, self.totsamp, self.coeffs);
            self.right.filter(right, pos, count, self.totsamp, self.coeffs);

            pos += count;
            self.totsamp += count;

            if self.totsamp == self.sample_window {
                self.close_window();
            }
        }

        self.left.store_block_tail(left);
        self.right.store_block_tail(right);
    }

    fn close_window(&mut self) {
        let mean_square = (self.left.sum + self.right.sum) / self.totsamp as f64 * 0.5;
        let val = STEPS_PER_DB * 10.0 * (mean_square + 1e-37).log10();
        let bin = if val <= 0.0 { 0 } else { (val as usize).min(HISTOGRAM_LEN - 1) };
        self.span[bin] += 1;

        self.left.shift_window(self.totsamp);
        self.right.shift_window(self.totsamp);
        self.totsamp = 0;
    }

    /// 返回当前片段的 ReplayGain（dB）并开始新片段
    ///
    /// 片段中没有完整的 RMS 窗口时返回 [`MixRampError::NotEnoughSamples`]。
    /// 数字静音（百分位落在直方图最低格）返回 `f64::INFINITY`。
    pub fn title_gain(&mut self) -> Result<f64> {
        let gain = analyze_result(&self.span);
        let samples = self.span_samples;

        for (t, s) in self.track.iter_mut().zip(self.span.iter_mut()) {
            *t += *s;
            *s = 0;
        }
        self.left.reset_history();
        self.right.reset_history();
        self.totsamp = 0;
        self.span_samples = 0;

        gain.ok_or(MixRampError::NotEnoughSamples(samples))
    }

    /// 整轨增益：所有已结束片段的累计结果
    pub fn album_gain(&self) -> Option<f64> {
        analyze_result(&self.track)
    }
}

/// 取直方图的 95 百分位，换算为相对参考响度所需的增益
fn analyze_result(histogram: &[u32]) -> Option<f64> {
    let elems: u64 = histogram.iter().map(|&c| u64::from(c)).sum();
    if elems == 0 { return None; }

    let mut upper = (elems as f64 * (1.0 - RMS_PERCENTILE)).ceil() as i64;
    let mut bin = 0;
    for (i, &count) in histogram.iter().enumerate().rev() {
        upper -= i64::from(count);
        if upper <= 0 {
            bin = i;
            break;
        }
    }

    if bin == 0 {
        return Some(f64::INFINITY);
    }
    Some(PINK_REF - bin as f64 / STEPS_PER_DB)
}
