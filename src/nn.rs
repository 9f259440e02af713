//! Neural Network inference.

use std::{
    ops::{Index, RangeInclusive},
    path::Path,
    sync::Arc,
};

use anyhow::Context;
use ndarray::{Array4, ArrayD, IxDyn};
use tract_onnx::prelude::{
    tvec, Framework, Graph, InferenceModelExt, SimplePlan, TValue, TVec, TypedFact, TypedOp,
};

use crate::image::{Color, Image, Resolution};

type Model = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A convolutional neural network (CNN) that operates on image data.
///
/// The network takes a single RGB image in `[N, C, H, W]` layout (`N` is fixed at 1, `C` is 3).
///
/// Like the underlying [`NeuralNetwork`], this is a cheaply [`Clone`]able handle to the underlying
/// data.
#[derive(Clone)]
pub struct Cnn {
    nn: NeuralNetwork,
    input_res: Resolution,
    color_mapper: ColorMapper,
}

impl Cnn {
    /// Creates a CNN wrapper from a [`NeuralNetwork`].
    ///
    /// The network must have exactly one input of shape `[1, 3, H, W]`.
    pub fn new(nn: NeuralNetwork, color_mapper: ColorMapper) -> anyhow::Result<Self> {
        let input_res = Self::get_input_res(&nn)?;

        Ok(Self {
            nn,
            input_res,
            color_mapper,
        })
    }

    fn get_input_res(nn: &NeuralNetwork) -> anyhow::Result<Resolution> {
        if nn.num_inputs() != 1 {
            anyhow::bail!(
                "CNN network has to take exactly 1 input, this one takes {}",
                nn.num_inputs(),
            );
        }

        let tensor_shape = nn.input_shape(0)?;
        let (w, h) = match &*tensor_shape {
            [1, 3, h, w] => (*w, *h),
            _ => anyhow::bail!("invalid CNN input shape {:?}, expected [1, 3, H, W]", tensor_shape),
        };

        let (w, h): (u32, u32) = (w.try_into()?, h.try_into()?);
        Ok(Resolution::new(w, h))
    }

    /// Returns the expected input image size.
    #[inline]
    pub fn input_resolution(&self) -> Resolution {
        self.input_res
    }

    /// Runs the network on an input image, returning the estimated outputs.
    ///
    /// If the image's resolution does not match the network's input resolution, the image will be
    /// stretched.
    pub fn estimate(&self, image: &Image) -> anyhow::Result<Outputs> {
        let tensor = self.image_to_tensor(image);
        self.nn.estimate(&Inputs::from(tensor))
    }

    fn image_to_tensor(&self, image: &Image) -> ArrayD<f32> {
        let resized = image.resize(self.input_res);
        let (h, w) = (
            self.input_res.height() as usize,
            self.input_res.width() as usize,
        );
        let pixel = |x: usize, y: usize| self.color_mapper.map(resized.get(x as u32, y as u32));

        Array4::from_shape_fn((1, 3, h, w), |(_, c, y, x)| pixel(x, y)[c]).into_dyn()
    }
}

/// Maps 8-bit color values to the network's expected input range.
#[derive(Debug, Clone)]
pub struct ColorMapper {
    target_range: RangeInclusive<f32>,
}

impl ColorMapper {
    /// Creates a simple color mapper that uniformly maps sRGB values to `target_range`.
    ///
    /// Note that this operates on *non-linear* sRGB colors, but maps them linearly to the target
    /// range.
    pub fn linear(target_range: RangeInclusive<f32>) -> Self {
        assert!(target_range.end() > target_range.start());
        Self { target_range }
    }

    fn map(&self, color: Color) -> [f32; 3] {
        let start = *self.target_range.start();
        let end = *self.target_range.end();

        let adjust_range = (end - start) / 255.0;
        [color.r(), color.g(), color.b()].map(|col| col as f32 * adjust_range + start)
    }
}

/// Neural network loader.
pub struct Loader {
    model_data: Vec<u8>,
}

impl Loader {

    /// Loads and optimizes the network.
    ///
    /// Returns an error if the network data is malformed, if the network data is incomplete, or if
    /// the network uses unimplemented operations.
    pub fn load(self) -> anyhow::Result<NeuralNetwork> {
        let graph = tract_onnx::onnx()
            .model_for_read(&mut &self.model_data[..])?
            .into_optimized()?;
        let model = SimplePlan::new(graph)?;

        Ok(NeuralNetwork(Arc::new(model)))
    }
}

/// A neural network that can be used for inference.
///
/// This is a cheaply [`Clone`]able handle to the underlying network structures.
#[derive(Clone)]
pub struct NeuralNetwork(Arc<Model>);

impl NeuralNetwork {
    /// Loads a pre-trained model from an ONNX file path.
    ///
    /// The path must have a `.onnx` extension.
    pub fn from_path<P: AsRef<Path>>(path: P) -> anyhow::Result<Loader> {
        Self::from_path_impl(path.as_ref())
    }

    fn from_path_impl(path: &Path) -> anyhow::Result<Loader> {
        match path.extension() {
            Some(ext) if ext == "onnx" => {}
            _ => anyhow::bail!(
                "neural network file '{}' must have `.onnx` extension",
                path.display()
            ),
        }

        let model_data = std::fs::read(path)
            .with_context(|| format!("failed to read network '{}'", path.display()))?;
        Ok(Loader { model_data })
    }

    /// Returns the number of input nodes of the network.
    pub fn num_inputs(&self) -> usize {
        self.0.model().inputs.len()
    }

    /// Returns the number of output nodes of the network.
    pub fn num_outputs(&self) -> usize {
        self.0.model().outputs.len()
    }

    /// Returns the concrete tensor shape of input `id`.
    pub fn input_shape(&self, id: usize) -> anyhow::Result<TVec<usize>> {
        let fact = self.0.model().input_fact(id)?;
        let shape = fact
            .shape
            .as_concrete()
            .with_context(|| format!("network input {id} has a symbolic shape"))?;
        Ok(shape.into())
    }

    /// Returns the concrete tensor shape of output `id`.
    pub fn output_shape(&self, id: usize) -> anyhow::Result<TVec<usize>> {
        let fact = self.0.model().output_fact(id)?;
        let shape = fact
            .shape
            .as_concrete()
            .with_context(|| format!("network output {id} has a symbolic shape"))?;
        Ok(shape.into())
    }

    /// Runs the network on a set of [`Inputs`], returning the estimated [`Outputs`].
    #[doc(alias = "infer")]
    pub fn estimate(&self, inputs: &Inputs) -> anyhow::Result<Outputs> {
        let inputs = inputs
            .inner
            .iter()
            .map(|t| {
                let shape = t.shape();
                let data = t.iter().copied().collect::<Vec<_>>();
                let tensor = tract_onnx::prelude::Tensor::from_shape(shape, &data)?;
                Ok(TValue::from_const(Arc::new(tensor)))
            })
            .collect::<anyhow::Result<TVec<_>>>()?;

        let outputs = self.0.run(inputs)?;
        let inner = outputs
            .into_iter()
            .map(|tract| {
                let data = tract.as_slice::<f32>()?.to_vec();
                Ok(ArrayD::from_shape_vec(IxDyn(tract.shape()), data)?)
            })
            .collect::<anyhow::Result<_>>()?;

        Ok(Outputs { inner })
    }
}

/// The result of a neural network inference pass.
///
/// This is a list of tensors corresponding to the network's output nodes.
#[derive(Debug)]
pub struct Outputs {
    inner: Vec<ArrayD<f32>>,
}

impl FromIterator<ArrayD<f32>> for Outputs {
    fn from_iter<T: IntoIterator<Item = ArrayD<f32>>>(iter: T) -> Self {
        Self {
            inner: iter.into_iter().collect(),
        }
    }
}

impl Index<usize> for Outputs {
    type Output = ArrayD<f32>;

    fn index(&self, index: usize) -> &ArrayD<f32> {
        &self.inner[index]
    }
}

/// List of input tensors for neural network inference.
#[derive(Debug)]
pub struct Inputs {
    inner: TVec<ArrayD<f32>>,
}

impl From<ArrayD<f32>> for Inputs {
    fn from(t: ArrayD<f32>) -> Self {
        Self { inner: tvec![t] }
    }
}
